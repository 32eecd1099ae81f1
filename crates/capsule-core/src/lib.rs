//! Shared foundation for the capsule platform: content digests, the
//! structured-logging macro family, config loading, random id
//! generation, and time-bucketing helpers for retention.
//!
//! Nothing here is specific to any one component (C1–C10 of
//! `spec.md`); everything in this crate is ambient plumbing every other
//! crate in the workspace depends on.

pub mod config;
pub mod digest;
pub mod ids;
pub mod logging;
pub mod time;

pub use digest::{Digest, DigestParseError};
pub use logging::Scope;
