//! The Capsule Runtime (C4 of `spec.md`): `create`/`start`/`stop`/
//! `restart`/`exec` (§4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use capsule_cas::Store as CasStore;
use capsule_core::{ids::random_hex_id, log_info, log_warn, Scope};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::cgroup::Cgroup;
use crate::config::{CapsuleConfig, CapsuleState};
use crate::error::{Error, Result};
use crate::namespaces::spawn_init;
use crate::rootfs::{self, RootfsLayout};

/// Default grace period before escalating `stop` to SIGKILL
/// (`spec.md` §4.4 "Signals & lifecycle").
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

struct CapsuleHandle {
    config: CapsuleConfig,
    state: CapsuleState,
    pid: Option<Pid>,
    cgroup: Option<Cgroup>,
    layout: Option<RootfsLayout>,
}

/// Owns every capsule created on this node, keyed by capsule id.
/// Fine-grained locking is per-map as described in `spec.md` §5; each
/// capsule's own record is additionally guarded so concurrent
/// `stop`/`exec` calls against the same id serialize.
pub struct CapsuleRuntime {
    cas: CasStore,
    root: std::path::PathBuf,
    cgroup_root: std::path::PathBuf,
    capsules: Mutex<HashMap<String, Arc<Mutex<CapsuleHandle>>>>,
}

impl CapsuleRuntime {
    pub fn new(cas: CasStore, root: impl Into<std::path::PathBuf>) -> Self {
        let root = root.into();
        Self {
            cas,
            cgroup_root: root.join("cgroup"),
            root,
            capsules: Mutex::new(HashMap::new()),
        }
    }

    /// `spec.md` §4.4 create flow, steps 1-5. Returns the new capsule's
    /// id in state [`CapsuleState::Created`] — callers invoke
    /// [`Self::start`] separately, matching the state machine's
    /// `Created -> Starting` transition being a distinct, observable
    /// step.
    pub async fn create(&self, config: CapsuleConfig) -> Result<String> {
        let id = random_hex_id(32);
        self.create_with_id(id.clone(), config).await?;
        Ok(id)
    }

    /// Same flow as [`Self::create`], but for callers that must pin the
    /// capsule id themselves ahead of time — the Cluster Manager
    /// (`spec.md` §4.8) allocates the id before it knows which node will
    /// run the capsule, so the same id names the assignment whichever
    /// node ends up creating it.
    pub async fn create_with_id(&self, id: impl Into<String>, config: CapsuleConfig) -> Result<()> {
        config.validate()?;
        let id = id.into();
        let scope = Scope::new("capsule", id.clone());

        let capsule_dir = self.root.join("capsules").join(&id);
        let layout = rootfs::prepare(&self.cas, &capsule_dir, &config.layers).await?;

        let handle = CapsuleHandle {
            config,
            state: CapsuleState::Created,
            pid: None,
            cgroup: None,
            layout: Some(layout),
        };
        self.capsules
            .lock()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(handle)));

        log_info!(&scope, "capsule created");
        Ok(())
    }

    /// Runs the remainder of `spec.md` §4.4's create flow: cgroup
    /// creation, fork, and exec, transitioning
    /// `Created -> Starting -> Running` (or `-> Failed` on error, with
    /// every kernel object released per the cleanup invariant of
    /// `spec.md` §4.4 / §8).
    pub async fn start(&self, id: &str) -> Result<()> {
        let handle = self.handle(id).await?;
        let mut guard = handle.lock().await;
        if guard.state != CapsuleState::Created {
            return Err(Error::InvalidConfiguration(format!(
                "capsule {id} is not in Created state"
            )));
        }
        guard.state = CapsuleState::Starting;
        let scope = Scope::new("capsule", id.to_string());

        let result = self.start_locked(id, &mut guard).await;
        match &result {
            Ok(()) => {
                guard.state = CapsuleState::Running;
                log_info!(&scope, "capsule running");
            }
            Err(err) => {
                log_warn!(&scope, error = %err, "capsule start failed, rolling back");
                self.cleanup_locked(&mut guard).await;
                guard.state = CapsuleState::Failed;
            }
        }
        result
    }

    async fn start_locked(&self, id: &str, guard: &mut CapsuleHandle) -> Result<()> {
        let layout = guard
            .layout
            .as_ref()
            .expect("layout set at create time and only cleared on teardown");

        let cgroup = Cgroup::create(&self.cgroup_root, id, &guard.config.limits).await?;

        let layout_clone = clone_layout(layout);
        let config = guard.config.clone();
        let pid = tokio::task::spawn_blocking(move || spawn_init(&layout_clone, &config))
            .await
            .expect("namespace setup task panicked")?;

        cgroup.add_process(pid.as_raw() as u32).await?;

        guard.pid = Some(pid);
        guard.cgroup = Some(cgroup);
        Ok(())
    }

    /// `stop`: SIGTERM, wait up to `grace`, then SIGKILL
    /// (`spec.md` §4.4 "Signals & lifecycle"). Always releases the
    /// cgroup on return, satisfying `spec.md` §8's "no child process
    /// remains; cgroup path is removed" postcondition.
    pub async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let handle = self.handle(id).await?;
        let mut guard = handle.lock().await;
        guard.state = CapsuleState::Stopping;

        if let Some(pid) = guard.pid {
            let _ = kill(pid, Signal::SIGTERM);
            let exited = timeout(grace, wait_for_exit(pid)).await.is_ok();
            if !exited {
                let _ = kill(pid, Signal::SIGKILL);
                let _ = wait_for_exit(pid).await;
            }
        }

        self.cleanup_locked(&mut guard).await;
        guard.state = CapsuleState::Stopped;
        let scope = Scope::new("capsule", id.to_string());
        log_info!(&scope, "capsule stopped");
        Ok(())
    }

    /// `restart = stop + create` (`spec.md` §4.4), re-using the same
    /// capsule id and configuration.
    pub async fn restart(&self, id: &str, grace: Duration) -> Result<()> {
        self.stop(id, grace).await?;
        self.reprepare_rootfs(id).await?;
        self.start(id).await
    }

    /// Re-prepare a stopped capsule's rootfs under its existing id and
    /// configuration, leaving it in [`CapsuleState::Created`] without
    /// starting it. `stop` tears the previous rootfs down entirely
    /// (`spec.md` §8's "no child process remains" postcondition), so a
    /// caller that wants to write into the capsule's filesystem before
    /// the next `start` — a snapshot restore or a rollback
    /// (`spec.md` §4.6) — must re-prepare it first.
    pub async fn reprepare_rootfs(&self, id: &str) -> Result<std::path::PathBuf> {
        let handle = self.handle(id).await?;
        let config = handle.lock().await.config.clone();
        let capsule_dir = self.root.join("capsules").join(id);
        let layout = rootfs::prepare(&self.cas, &capsule_dir, &config.layers).await?;
        let upper_dir = layout.upper_dir.clone();
        let mut guard = handle.lock().await;
        guard.layout = Some(layout);
        guard.state = CapsuleState::Created;
        Ok(upper_dir)
    }

    /// `exec`: attach to an existing capsule's namespaces and run a
    /// process within them (`spec.md` §4.4). Returns the pid of the
    /// attached process as seen from the host pid namespace.
    pub async fn exec(&self, id: &str, command: Vec<String>) -> Result<Pid> {
        let handle = self.handle(id).await?;
        let guard = handle.lock().await;
        let target = guard
            .pid
            .ok_or_else(|| Error::InvalidConfiguration(format!("capsule {id} is not running")))?;

        tokio::task::spawn_blocking(move || crate::exec::attach(target, command))
            .await
            .expect("exec attach task panicked")
    }

    pub async fn state(&self, id: &str) -> Result<CapsuleState> {
        Ok(self.handle(id).await?.lock().await.state)
    }

    pub async fn pid(&self, id: &str) -> Result<Pid> {
        self.handle(id)
            .await?
            .lock()
            .await
            .pid
            .ok_or_else(|| Error::InvalidConfiguration(format!("capsule {id} is not running")))
    }

    /// The overlay mountpoint a running capsule's filesystem is
    /// visible at on the host, for snapshot/migration to read from
    /// (`spec.md` §4.6).
    pub async fn merged_rootfs(&self, id: &str) -> Result<std::path::PathBuf> {
        let handle = self.handle(id).await?;
        let guard = handle.lock().await;
        guard
            .layout
            .as_ref()
            .map(|l| l.merged_dir.clone())
            .ok_or_else(|| Error::InvalidConfiguration(format!("capsule {id} has no rootfs prepared")))
    }

    /// The overlay's writable upper directory, where a snapshot
    /// restore writes state back to before the capsule is started —
    /// the overlay mount itself only happens inside `start`'s forked
    /// child (`spec.md` §4.6 "Restore").
    pub async fn upper_rootfs(&self, id: &str) -> Result<std::path::PathBuf> {
        let handle = self.handle(id).await?;
        let guard = handle.lock().await;
        guard
            .layout
            .as_ref()
            .map(|l| l.upper_dir.clone())
            .ok_or_else(|| Error::InvalidConfiguration(format!("capsule {id} has no rootfs prepared")))
    }

    /// Freeze a capsule's root process tree via the cgroup freezer
    /// (`spec.md` §4.6 step 2, live migration pre-pause).
    pub async fn freeze(&self, id: &str) -> Result<()> {
        let handle = self.handle(id).await?;
        let guard = handle.lock().await;
        let cgroup = guard
            .cgroup
            .as_ref()
            .ok_or_else(|| Error::InvalidConfiguration(format!("capsule {id} is not running")))?;
        cgroup.freeze().await
    }

    pub async fn thaw(&self, id: &str) -> Result<()> {
        let handle = self.handle(id).await?;
        let guard = handle.lock().await;
        let cgroup = guard
            .cgroup
            .as_ref()
            .ok_or_else(|| Error::InvalidConfiguration(format!("capsule {id} is not running")))?;
        cgroup.thaw().await
    }

    async fn handle(&self, id: &str) -> Result<Arc<Mutex<CapsuleHandle>>> {
        self.capsules
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Release every kernel object attributable to a capsule: cgroup
    /// directory and unpacked rootfs tree. Idempotent — safe to call
    /// on a capsule that never finished starting (`spec.md` §8).
    async fn cleanup_locked(&self, guard: &mut CapsuleHandle) {
        if let Some(cgroup) = guard.cgroup.take() {
            if let Err(e) = cgroup.destroy().await {
                log_warn!(
                    &Scope::new("capsule", "cleanup"),
                    error = %e,
                    "failed to remove cgroup during cleanup"
                );
            }
        }
        if let Some(layout) = guard.layout.take() {
            let _ = tokio::fs::remove_dir_all(&layout.capsule_dir).await;
        }
        guard.pid = None;
    }
}

fn clone_layout(layout: &RootfsLayout) -> RootfsLayout {
    RootfsLayout {
        capsule_dir: layout.capsule_dir.clone(),
        lower_dirs: layout.lower_dirs.clone(),
        upper_dir: layout.upper_dir.clone(),
        work_dir: layout.work_dir.clone(),
        merged_dir: layout.merged_dir.clone(),
    }
}

async fn wait_for_exit(pid: Pid) {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => tokio::time::sleep(Duration::from_millis(50)).await,
            _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grace_is_ten_seconds() {
        assert_eq!(DEFAULT_STOP_GRACE, Duration::from_secs(10));
    }
}
