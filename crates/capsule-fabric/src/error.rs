//! Error taxonomy for the network fabric (`spec.md` §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection to {0} failed: {1}")]
    ConnectionFailed(String, String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("service discovery failed for {0:?}")]
    ServiceDiscoveryFailed(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
