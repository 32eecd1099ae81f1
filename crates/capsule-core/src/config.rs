//! Config loading.
//!
//! Node and project configuration are TOML documents deserialized with
//! `serde`. Defaults live on the target struct's `Default` impl, not
//! here — this module only resolves "a path on disk" to "a value".

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Load and parse a TOML config file into `T`.
pub fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

/// Parse a TOML document already in memory (project specs embedded in
/// tests, or piped in on stdin by a caller).
pub fn parse<T: DeserializeOwned>(raw: &str) -> Result<T> {
    toml::from_str(raw).context("parsing inline config document")
}
