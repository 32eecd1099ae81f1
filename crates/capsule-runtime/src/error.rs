//! Error taxonomy for the capsule runtime (`spec.md` §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create namespace: {0}")]
    NamespaceCreationFailed(String),

    #[error("failed to create cgroup: {0}")]
    CgroupCreationFailed(String),

    #[error("mount failed: {0}")]
    MountFailed(String),

    #[error("exec failed: {0}")]
    ExecFailed(String),

    #[error("invalid capsule configuration: {0}")]
    InvalidConfiguration(String),

    #[error("operation requires privileges not available in rootless mode: {0}")]
    PermissionDenied(String),

    #[error("capsule {0:?} not found")]
    NotFound(String),

    #[error(transparent)]
    Cas(#[from] capsule_cas::Error),

    #[error(transparent)]
    Image(#[from] capsule_image::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
