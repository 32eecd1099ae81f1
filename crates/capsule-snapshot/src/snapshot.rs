//! The `Snapshot` record and its CAS-backed metadata encoding
//! (`spec.md` §3 "Snapshot", §6 "Snapshot metadata").

use std::collections::BTreeMap;

use capsule_cas::{ObjectKind, Store as CasStore};
use capsule_core::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::{NetworkState, ProcessState};

/// `spec.md` §3's `Snapshot`: immutable once finalized, stored by
/// reference in CAS. `memory_image_digest` and `filesystem_digest`
/// point at the CAS objects the real bytes live in; network and
/// process state are small enough to inline as metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub capsule_id: String,
    pub taken_at: DateTime<Utc>,
    pub memory_image_digest: Digest,
    pub filesystem_digest: Digest,
    pub network_state: NetworkState,
    pub process_state: ProcessState,
    pub metadata: BTreeMap<String, String>,
    /// Opted out of retention sweeps when named and `keep_forever` is
    /// set (`spec.md` §4.10).
    pub name: Option<String>,
    pub keep_forever: bool,
}

impl Snapshot {
    /// Serialize this record to the CAS as a `FILESYSTEM_SNAPSHOT_v1`
    /// header followed by `key:value` lines (`spec.md` §6), storing
    /// the structured process/network state and metadata as one JSON
    /// value line since they aren't meaningfully flattened as scalars.
    pub async fn store(&self, cas: &CasStore) -> Result<Digest> {
        let mut text = String::from("FILESYSTEM_SNAPSHOT_v1\n");
        text.push_str(&format!("capsule_id:{}\n", self.capsule_id));
        text.push_str(&format!("taken_at:{}\n", self.taken_at.to_rfc3339()));
        text.push_str(&format!("memory_image_digest:{}\n", self.memory_image_digest));
        text.push_str(&format!("filesystem_digest:{}\n", self.filesystem_digest));
        text.push_str(&format!("keep_forever:{}\n", self.keep_forever));
        if let Some(name) = &self.name {
            text.push_str(&format!("name:{name}\n"));
        }
        let structured = serde_json::to_string(&(&self.network_state, &self.process_state, &self.metadata))
            .map_err(|e| Error::StateCorrupted(e.to_string()))?;
        text.push_str(&format!("structured:{structured}\n"));
        cas.put(text.into_bytes(), ObjectKind::Snapshot)
            .await
            .map_err(Error::from)
    }

    pub async fn load(cas: &CasStore, digest: Digest) -> Result<Self> {
        let bytes = cas.get(digest).await?;
        let text = String::from_utf8(bytes).map_err(|e| Error::StateCorrupted(e.to_string()))?;
        let mut lines = text.lines();
        match lines.next() {
            Some("FILESYSTEM_SNAPSHOT_v1") => {}
            other => return Err(Error::StateCorrupted(format!("expected FILESYSTEM_SNAPSHOT_v1 header, found {other:?}"))),
        }

        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        for line in lines {
            if let Some((key, value)) = line.split_once(':') {
                fields.insert(key, value);
            }
        }

        let capsule_id = fields
            .get("capsule_id")
            .ok_or_else(|| Error::StateCorrupted("missing capsule_id".into()))?
            .to_string();
        let taken_at = fields
            .get("taken_at")
            .ok_or_else(|| Error::StateCorrupted("missing taken_at".into()))?
            .parse::<DateTime<Utc>>()
            .map_err(|e| Error::StateCorrupted(e.to_string()))?;
        let memory_image_digest: Digest = fields
            .get("memory_image_digest")
            .ok_or_else(|| Error::StateCorrupted("missing memory_image_digest".into()))?
            .parse()
            .map_err(|_| Error::StateCorrupted("invalid memory_image_digest".into()))?;
        let filesystem_digest: Digest = fields
            .get("filesystem_digest")
            .ok_or_else(|| Error::StateCorrupted("missing filesystem_digest".into()))?
            .parse()
            .map_err(|_| Error::StateCorrupted("invalid filesystem_digest".into()))?;
        let keep_forever = fields.get("keep_forever").map(|v| *v == "true").unwrap_or(false);
        let name = fields.get("name").map(|v| v.to_string());
        let structured = fields
            .get("structured")
            .ok_or_else(|| Error::StateCorrupted("missing structured field".into()))?;
        let (network_state, process_state, metadata): (NetworkState, ProcessState, BTreeMap<String, String>) =
            serde_json::from_str(structured).map_err(|e| Error::StateCorrupted(e.to_string()))?;

        Ok(Self {
            capsule_id,
            taken_at,
            memory_image_digest,
            filesystem_digest,
            network_state,
            process_state,
            metadata,
            name,
            keep_forever,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FdEntry, ThreadState};

    fn sample(capsule_id: &str) -> Snapshot {
        Snapshot {
            capsule_id: capsule_id.to_string(),
            taken_at: Utc::now(),
            memory_image_digest: Digest::of(b"memory"),
            filesystem_digest: Digest::of(b"fs"),
            network_state: NetworkState::default(),
            process_state: ProcessState {
                pid: 100,
                ppid: 1,
                threads: vec![ThreadState {
                    tid: 100,
                    instruction_pointer: 0,
                    stack_pointer: 0,
                    raw_registers: Vec::new(),
                }],
                fds: vec![FdEntry {
                    fd: 0,
                    target: "/dev/null".into(),
                }],
            },
            metadata: BTreeMap::new(),
            name: Some("pre-deploy".into()),
            keep_forever: true,
        }
    }

    #[tokio::test]
    async fn round_trips_through_cas() {
        let dir = tempfile::tempdir().unwrap();
        let cas = CasStore::open(dir.path()).unwrap();
        let snapshot = sample("abc123");

        let digest = snapshot.store(&cas).await.unwrap();
        let loaded = Snapshot::load(&cas, digest).await.unwrap();

        assert_eq!(loaded.capsule_id, "abc123");
        assert_eq!(loaded.process_state.threads.len(), 1);
        assert!(loaded.keep_forever);
        assert_eq!(loaded.name.as_deref(), Some("pre-deploy"));
    }
}
