//! Namespace and rootfs setup for a capsule's init process
//! (`spec.md` §4.4 step 4).
//!
//! Forking a multi-threaded process (as any Tokio binary is) is only
//! async-signal-safe if the child does nothing but syscalls and
//! `execve` before replacing itself — this module is run from a
//! dedicated `std::thread`, never from within the async runtime
//! directly, and the child path never allocates on the heap after
//! `fork`.

use std::ffi::CString;
use std::path::Path;

use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::unistd::{chdir, chroot, execvp, fork, sethostname, ForkResult, Pid};

use crate::config::CapsuleConfig;
use crate::error::{Error, Result};
use crate::rootfs::RootfsLayout;

/// Namespace flags requested for a capsule's init process
/// (`spec.md` §4.4 step 4: "new PID, NET, MOUNT, UTS, and (where
/// requested) USER namespaces").
fn clone_flags(config: &CapsuleConfig) -> CloneFlags {
    let mut flags = CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWIPC;
    if config.rootless {
        flags |= CloneFlags::CLONE_NEWUSER;
    }
    flags
}

/// Run steps 4-5 of `spec.md` §4.4's create flow: unshare namespaces,
/// fork, and in the child mount the overlay rootfs, `/proc`/`/sys`/
/// `/dev/pts`, chroot, chdir, and exec the entrypoint. Returns the
/// child's pid as seen from the parent's (outer) pid namespace.
///
/// On any failure during child setup, the child exits non-zero rather
/// than returning — there is no caller to propagate an `Err` to once
/// execution has forked away from the async task that requested
/// `create`.
pub fn spawn_init(layout: &RootfsLayout, config: &CapsuleConfig) -> Result<Pid> {
    unshare(clone_flags(config))
        .map_err(|e| Error::NamespaceCreationFailed(format!("unshare: {e}")))?;

    // Safety: the calling thread is a dedicated, otherwise-idle
    // `std::thread` (see module docs); the child only performs
    // async-signal-safe operations before `execvp`.
    match unsafe { fork() }.map_err(|e| Error::NamespaceCreationFailed(format!("fork: {e}")))? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            if let Err(err) = run_child(layout, config) {
                eprintln!("capsule init setup failed: {err}");
                std::process::exit(127);
            }
            unreachable!("run_child execs on success");
        }
    }
}

fn run_child(layout: &RootfsLayout, config: &CapsuleConfig) -> Result<()> {
    sethostname(&config.hostname)
        .map_err(|e| Error::NamespaceCreationFailed(format!("sethostname: {e}")))?;

    mount_overlay(layout)?;
    mount_pseudo_filesystems(&layout.merged_dir)?;

    chroot(&layout.merged_dir).map_err(|e| Error::MountFailed(format!("chroot: {e}")))?;
    chdir(&config.working_dir).map_err(|e| Error::MountFailed(format!("chdir: {e}")))?;

    let program = CString::new(config.entrypoint[0].as_bytes())
        .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
    let args = config
        .entrypoint
        .iter()
        .map(|a| CString::new(a.as_bytes()).map_err(|e| Error::InvalidConfiguration(e.to_string())))
        .collect::<Result<Vec<_>>>()?;

    execvp(&program, &args).map_err(|e| Error::ExecFailed(e.to_string()))?;
    unreachable!("execvp only returns on error");
}

fn mount_overlay(layout: &RootfsLayout) -> Result<()> {
    mount(
        Some("overlay"),
        &layout.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(layout.overlay_data().as_str()),
    )
    .map_err(|e| Error::MountFailed(format!("overlay mount: {e}")))
}

fn mount_pseudo_filesystems(merged_dir: &Path) -> Result<()> {
    let proc_dir = merged_dir.join("proc");
    let sys_dir = merged_dir.join("sys");
    let devpts_dir = merged_dir.join("dev/pts");
    for dir in [&proc_dir, &sys_dir, &devpts_dir] {
        std::fs::create_dir_all(dir)?;
    }

    mount(
        Some("proc"),
        &proc_dir,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|e| Error::MountFailed(format!("mount /proc: {e}")))?;

    mount(
        Some("sysfs"),
        &sys_dir,
        Some("sysfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|e| Error::MountFailed(format!("mount /sys: {e}")))?;

    mount(
        Some("devpts"),
        &devpts_dir,
        Some("devpts"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
        Some("newinstance,ptmxmode=0666,mode=0620"),
    )
    .map_err(|e| Error::MountFailed(format!("mount /dev/pts: {e}")))?;

    Ok(())
}
