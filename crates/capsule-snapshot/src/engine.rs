//! `snapshot`/`restore` (`spec.md` §4.6).

use std::path::Path;

use capsule_cas::{ObjectKind, Store as CasStore};
use capsule_core::{log_info, Digest, Scope};
use capsule_runtime::CapsuleRuntime;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::state::{self, ProcessState};

/// Snapshots and restores capsules against one CAS and one runtime.
pub struct SnapshotEngine {
    cas: CasStore,
}

impl SnapshotEngine {
    pub fn new(cas: CasStore) -> Self {
        Self { cas }
    }

    /// Take a consistent snapshot of a running capsule: tar its
    /// merged rootfs, capture process and network state, write a
    /// `MEMORY_DUMP_v1` record of that process state, and assemble the
    /// `Snapshot` (`spec.md` §4.6 paragraph 1).
    pub async fn take(
        &self,
        runtime: &CapsuleRuntime,
        capsule_id: &str,
        name: Option<String>,
        keep_forever: bool,
    ) -> Result<Snapshot> {
        let scope = Scope::new("capsule", capsule_id.to_string());
        let merged_dir = runtime.merged_rootfs(capsule_id).await?;
        let pid = runtime.pid(capsule_id).await?;

        let filesystem_digest = self.snapshot_filesystem(&merged_dir).await?;
        let process_state = state::capture_process_state(pid).await?;
        let network_state = state::capture_network_state();
        let memory_image_digest = self.write_memory_dump(&process_state).await?;

        log_info!(&scope, filesystem_digest = %filesystem_digest, memory_image_digest = %memory_image_digest, "snapshot taken");

        Ok(Snapshot {
            capsule_id: capsule_id.to_string(),
            taken_at: Utc::now(),
            memory_image_digest,
            filesystem_digest,
            network_state,
            process_state,
            metadata: Default::default(),
            name,
            keep_forever,
        })
    }

    async fn snapshot_filesystem(&self, merged_dir: &Path) -> Result<Digest> {
        let dir = merged_dir.to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut out = Vec::new();
            {
                let mut builder = tar::Builder::new(&mut out);
                builder.append_dir_all(".", &dir)?;
                builder.finish()?;
            }
            Ok(out)
        })
        .await
        .expect("filesystem tar task panicked")?;

        self.cas.put(bytes, ObjectKind::Snapshot).await.map_err(Error::from)
    }

    async fn write_memory_dump(&self, process_state: &ProcessState) -> Result<Digest> {
        let mut text = String::from("MEMORY_DUMP_v1\n");
        text.push_str(&format!("pid:{}\n", process_state.pid));
        text.push_str(&format!("ppid:{}\n", process_state.ppid));
        text.push_str(&format!("thread_count:{}\n", process_state.threads.len()));
        let structured = serde_json::to_string(process_state).map_err(|e| Error::StateCorrupted(e.to_string()))?;
        text.push_str(&format!("structured:{structured}\n"));
        self.cas
            .put(text.into_bytes(), ObjectKind::Snapshot)
            .await
            .map_err(Error::from)
    }

    /// Restore is the inverse of `take`: fetch the filesystem blob and
    /// unpack it over a fresh capsule's overlay upper directory, so
    /// the restored state is present before the overlay is mounted at
    /// `start` time. Namespace, socket, and file-descriptor
    /// reinstatement happen as part of `CapsuleRuntime::start` on the
    /// restored capsule; this crate only prepares the filesystem state
    /// the new instance boots from (`spec.md` §4.6 paragraph 2).
    pub async fn restore_filesystem(&self, snapshot: &Snapshot, dest_upper_dir: &Path) -> Result<()> {
        let bytes = self.cas.get(snapshot.filesystem_digest).await?;
        let dest = dest_upper_dir.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));
            archive.set_preserve_permissions(true);
            archive.unpack(&dest)
        })
        .await
        .expect("filesystem restore task panicked")
        .map_err(|e| Error::RestoreFailed(snapshot.capsule_id.clone(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_dump_round_trips_through_cas() {
        let dir = tempfile::tempdir().unwrap();
        let cas = CasStore::open(dir.path()).unwrap();
        let engine = SnapshotEngine::new(cas.clone());

        let process_state = ProcessState {
            pid: 42,
            ppid: 1,
            threads: Vec::new(),
            fds: Vec::new(),
        };
        let digest = engine.write_memory_dump(&process_state).await.unwrap();
        let bytes = cas.get(digest).await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("MEMORY_DUMP_v1\n"));
        assert!(text.contains("pid:42"));
    }
}
