//! cgroup v2 plumbing (`spec.md` §4.4 step 3, §5 "Cgroup files").
//!
//! Only the capsule runtime mutates a capsule's cgroup files; the
//! controller that created a cgroup is the only writer for its
//! lifetime (`spec.md` §5).

use std::path::{Path, PathBuf};

use capsule_core::{log_info, Scope};

use crate::config::ResourceLimits;
use crate::error::{Error, Result};

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// A handle to one capsule's cgroup v2 directory.
pub struct Cgroup {
    path: PathBuf,
}

impl Cgroup {
    /// Create a stable cgroup path for `capsule_id` under a
    /// `capsule.slice` parent and apply `limits` (`spec.md` §4.4 step
    /// 3). `root` overrides [`CGROUP_ROOT`] for tests.
    pub async fn create(root: &Path, capsule_id: &str, limits: &ResourceLimits) -> Result<Self> {
        let path = root.join("capsule.slice").join(capsule_id);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| Error::CgroupCreationFailed(format!("{}: {e}", path.display())))?;

        if let Some(bytes) = limits.memory_max_bytes {
            // Invariant enforced earlier in `CapsuleConfig::validate`,
            // re-checked here since this is the actual write path.
            if bytes == 0 {
                return Err(Error::CgroupCreationFailed("memory.max = 0 is forbidden".into()));
            }
            write_control(&path, "memory.max", &bytes.to_string()).await?;
        }
        if let Some(quota_us) = limits.cpu_quota_us {
            write_control(&path, "cpu.max", &format!("{quota_us} 100000")).await?;
        }

        let scope = Scope::new("capsule", capsule_id);
        log_info!(&scope, cgroup_path = %path.display(), "cgroup created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a pid to this cgroup's process list.
    pub async fn add_process(&self, pid: u32) -> Result<()> {
        write_control(&self.path, "cgroup.procs", &pid.to_string()).await
    }

    /// Freeze every process in the cgroup (live migration pre-pause,
    /// `spec.md` §4.6 step 2: "SIGSTOP of the root process tree via
    /// the cgroup freezer").
    pub async fn freeze(&self) -> Result<()> {
        write_control(&self.path, "cgroup.freeze", "1").await
    }

    pub async fn thaw(&self) -> Result<()> {
        write_control(&self.path, "cgroup.freeze", "0").await
    }

    /// Remove the cgroup directory. Must only be called once every
    /// process inside it has exited, or the kernel refuses the rmdir;
    /// callers (`CapsuleRuntime::stop`) wait for the child before
    /// calling this (`spec.md` §8: "cgroup path is removed").
    pub async fn destroy(self) -> Result<()> {
        tokio::fs::remove_dir(&self.path)
            .await
            .map_err(|e| Error::CgroupCreationFailed(format!("removing {}: {e}", self.path.display())))
    }
}

async fn write_control(cgroup_path: &Path, file: &str, value: &str) -> Result<()> {
    let target = cgroup_path.join(file);
    tokio::fs::write(&target, value)
        .await
        .map_err(|e| Error::CgroupCreationFailed(format!("writing {}: {e}", target.display())))
}

pub fn default_root() -> &'static Path {
    Path::new(CGROUP_ROOT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_rejects_zero_memory_max() {
        let dir = tempfile::tempdir().unwrap();
        let limits = ResourceLimits {
            memory_max_bytes: Some(0),
            cpu_quota_us: None,
        };
        let err = Cgroup::create(dir.path(), "abc123", &limits).await.unwrap_err();
        assert!(matches!(err, Error::CgroupCreationFailed(_)));
    }

    #[tokio::test]
    async fn create_writes_control_files() {
        let dir = tempfile::tempdir().unwrap();
        let limits = ResourceLimits {
            memory_max_bytes: Some(512 * 1024 * 1024),
            cpu_quota_us: Some(50_000),
        };
        let cgroup = Cgroup::create(dir.path(), "abc123", &limits).await.unwrap();
        let mem = tokio::fs::read_to_string(cgroup.path().join("memory.max"))
            .await
            .unwrap();
        assert_eq!(mem, (512 * 1024 * 1024).to_string());
        let cpu = tokio::fs::read_to_string(cgroup.path().join("cpu.max")).await.unwrap();
        assert_eq!(cpu, "50000 100000");
    }

    #[tokio::test]
    async fn destroy_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cgroup = Cgroup::create(dir.path(), "abc123", &ResourceLimits::default())
            .await
            .unwrap();
        let path = cgroup.path().to_path_buf();
        cgroup.destroy().await.unwrap();
        assert!(!path.exists());
    }
}
