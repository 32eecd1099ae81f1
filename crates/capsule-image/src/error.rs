//! Error taxonomy for the image store (`spec.md` §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("image {0:?} not found")]
    ImageNotFound(String),

    #[error("invalid image format: {0}")]
    InvalidImageFormat(String),

    #[error("registry error: {0}")]
    RegistryError(String),

    #[error("network error reaching registry: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error(transparent)]
    Cas(#[from] capsule_cas::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
