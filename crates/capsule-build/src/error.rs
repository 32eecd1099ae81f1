//! Error taxonomy for the build cache and reproducible builder (`spec.md` §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid build spec: {0}")]
    InvalidBuildSpec(String),

    #[error("build input {role:?} references a digest not present in the store: {digest}")]
    DependencyNotFound {
        role: String,
        digest: capsule_core::Digest,
    },

    #[error("build command exited with status {status}")]
    BuildFailed { status: i32 },

    #[error("no cache entry for fingerprint {0}")]
    CacheMiss(capsule_core::Digest),

    #[error("validation pass failed: {0}")]
    ValidationFailed(String),

    #[error("output {name:?} differed across reproducibility passes: {first} != {second}")]
    NonDeterministic {
        name: String,
        first: capsule_core::Digest,
        second: capsule_core::Digest,
    },

    #[error(transparent)]
    Cas(#[from] capsule_cas::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
