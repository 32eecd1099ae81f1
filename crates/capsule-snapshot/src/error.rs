//! Error taxonomy for snapshot and migration (`spec.md` §7 "Migration").

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("snapshot of capsule {0} failed: {1}")]
    SnapshotFailed(String, String),

    #[error("restore of capsule {0} failed: {1}")]
    RestoreFailed(String, String),

    #[error("network state transfer failed: {0}")]
    NetworkTransferFailed(String),

    #[error("snapshot state is corrupted: {0}")]
    StateCorrupted(String),

    #[error("checkpoint {0} is invalid: {1}")]
    InvalidCheckpoint(String, String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error(transparent)]
    Cas(#[from] capsule_cas::Error),

    #[error(transparent)]
    Runtime(#[from] capsule_runtime::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
