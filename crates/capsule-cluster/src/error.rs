//! Error taxonomy for the cluster manager (`spec.md` §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no node satisfies constraints for capsule {0:?}")]
    NoEligibleNode(String),

    #[error("node {0:?} not found")]
    NodeNotFound(String),

    #[error("no leader elected")]
    NoLeader,

    #[error("assignment {0:?} not found")]
    AssignmentNotFound(String),

    #[error(transparent)]
    Quota(#[from] capsule_quota::Error),

    #[error(transparent)]
    Fabric(#[from] capsule_fabric::Error),

    #[error(transparent)]
    Runtime(#[from] capsule_runtime::Error),

    #[error(transparent)]
    Snapshot(#[from] capsule_snapshot::Error),
}
