//! Content-Addressed Store (C1 of `spec.md`).
//!
//! Durable, deduplicated storage of blobs keyed by cryptographic
//! digest, laid out on disk as a two-level hex shard
//! (`objects/<first-2-hex>/<remaining-hex>`) with write-then-rename
//! atomicity through a `tmp/` staging directory on the same
//! filesystem. See `spec.md` §4.1, §6, §8.

mod error;
mod store;

pub use error::{Error, Result};
pub use store::{CasObject, GcStats, ObjectKind, Store};
