//! Error taxonomy for the snapshot policy engine.
//!
//! `spec.md` §7 does not enumerate a dedicated "Policy" error family —
//! C10 sits on top of C6, so its failures are either a snapshot
//! failure bubbling straight through or a malformed trigger/retention
//! configuration the engine rejects at registration time.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid trigger configuration: {0}")]
    InvalidTrigger(String),

    #[error("invalid retention configuration: {0}")]
    InvalidRetention(String),

    #[error("file watcher error: {0}")]
    Watch(String),

    #[error(transparent)]
    Snapshot(#[from] capsule_snapshot::Error),
}
