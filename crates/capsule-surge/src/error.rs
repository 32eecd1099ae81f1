//! Error taxonomy for the orchestrator (`spec.md` §7 "Orchestrator").

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("project spec not found: {0}")]
    SpecNotFound(String),

    #[error("invalid project spec: {0}")]
    InvalidSpec(String),

    #[error("service {0} failed to start: {1}")]
    ServiceStartFailed(String, String),

    #[error("service {0} failed to stop: {1}")]
    ServiceStopFailed(String, String),

    #[error("dependency error: {0}")]
    DependencyError(String),

    #[error(transparent)]
    Image(#[from] capsule_image::Error),

    #[error(transparent)]
    Runtime(#[from] capsule_runtime::Error),

    #[error(transparent)]
    Cluster(#[from] capsule_cluster::Error),

    #[error(transparent)]
    Fabric(#[from] capsule_fabric::Error),

    #[error(transparent)]
    Quota(#[from] capsule_quota::Error),

    #[error(transparent)]
    Cas(#[from] capsule_cas::Error),
}

/// Maps an orchestrator error to the logical exit code named in
/// `spec.md` §6: `0` success is the caller's job to report on `Ok`,
/// this only covers the failure codes `2`-`7`.
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::SpecNotFound(_) | Error::InvalidSpec(_) => 2,
        Error::DependencyError(_) => 3,
        Error::Image(_) => 4,
        Error::Quota(_) => 5,
        Error::Cluster(capsule_cluster::Error::NoEligibleNode(_)) => 6,
        Error::ServiceStartFailed(_, _) | Error::ServiceStopFailed(_, _) | Error::Cluster(_) | Error::Runtime(_) | Error::Cas(_) => 6,
        Error::Fabric(_) => 7,
    }
}
