//! Error taxonomy for the content-addressed store (`spec.md` §7).

use capsule_core::Digest;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("object {0} not found in the store")]
    NotFound(Digest),

    #[error("object {digest} failed re-hash on read; the object has been quarantined")]
    HashMismatch { digest: Digest },

    #[error("refusing to store impossible content: {0}")]
    InvalidContent(String),

    #[error("storage I/O error: {0}")]
    StorageError(#[from] std::io::Error),
}
