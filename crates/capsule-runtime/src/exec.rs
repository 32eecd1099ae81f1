//! `exec`: attach to an existing capsule's namespaces and run a
//! process inside them (`spec.md` §4.4).

use std::ffi::CString;
use std::fs::File;
use std::os::fd::AsFd;

use nix::sched::{setns, CloneFlags};
use nix::unistd::{fork, ForkResult, Pid};

use crate::error::{Error, Result};

/// Namespace kinds attached to for `exec`, in the order the kernel
/// requires (user namespace, if attached at all, must be entered
/// before the others that depend on its mappings).
const NS_KINDS: &[(&str, CloneFlags)] = &[
    ("uts", CloneFlags::CLONE_NEWUTS),
    ("ipc", CloneFlags::CLONE_NEWIPC),
    ("net", CloneFlags::CLONE_NEWNET),
    ("pid", CloneFlags::CLONE_NEWPID),
    ("mnt", CloneFlags::CLONE_NEWNS),
];

/// Attach to `target`'s namespaces via `/proc/<pid>/ns/*` and fork a
/// process running `command` inside them. Returns the forked pid as
/// seen from the host's (caller's) pid namespace.
pub fn attach(target: Pid, command: Vec<String>) -> Result<Pid> {
    let mut ns_files = Vec::with_capacity(NS_KINDS.len());
    for (name, _) in NS_KINDS {
        let path = format!("/proc/{}/ns/{name}", target.as_raw());
        let file = File::open(&path)
            .map_err(|e| Error::NamespaceCreationFailed(format!("opening {path}: {e}")))?;
        ns_files.push(file);
    }

    for (file, (name, _)) in ns_files.iter().zip(NS_KINDS) {
        setns(file.as_fd(), CloneFlags::empty())
            .map_err(|e| Error::NamespaceCreationFailed(format!("setns({name}): {e}")))?;
    }

    // Safety: see `namespaces::spawn_init` — this path is only ever
    // invoked from a dedicated blocking thread, never directly from
    // async context.
    match unsafe { fork() }.map_err(|e| Error::NamespaceCreationFailed(format!("fork: {e}")))? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            if let Err(err) = run_command(command) {
                eprintln!("capsule exec failed: {err}");
                std::process::exit(127);
            }
            unreachable!("run_command execs on success");
        }
    }
}

fn run_command(command: Vec<String>) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Err(Error::InvalidConfiguration("exec command is empty".into()));
    };
    let program = CString::new(program.as_bytes()).map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
    let mut argv = vec![program.clone()];
    for arg in args {
        argv.push(CString::new(arg.as_bytes()).map_err(|e| Error::InvalidConfiguration(e.to_string()))?);
    }
    nix::unistd::execvp(&program, &argv).map_err(|e| Error::ExecFailed(e.to_string()))?;
    unreachable!("execvp only returns on error");
}
