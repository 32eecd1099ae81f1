//! Error taxonomy for the quota manager (`spec.md` §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("quota exceeded for {scope} resource {resource:?}: used {used} + requested {requested} > hard limit {hard}")]
    QuotaExceeded {
        scope: String,
        resource: crate::quota::ResourceKind,
        used: u64,
        requested: u64,
        hard: u64,
    },

    #[error("invalid quota spec: {0}")]
    InvalidQuotaSpec(String),

    #[error("no quota named {0:?}")]
    QuotaNotFound(String),

    #[error("insufficient permissions to modify quota {0:?}")]
    InsufficientPermissions(String),
}
