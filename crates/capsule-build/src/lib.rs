//! Build Cache and Reproducible Builder (C2 of `spec.md`).
//!
//! Maps a deterministic build-input fingerprint to a stored output
//! manifest, atop the CAS (C1). See `spec.md` §4.2, §8.

mod builder;
mod cache;
mod error;
mod executor;
mod spec;

pub use builder::Builder;
pub use cache::{BuildCache, BuildCacheEntry};
pub use error::{Error, Result};
pub use executor::{BuildExecutor, ExecutionResult, SubprocessExecutor};
pub use spec::{fingerprint, BuildInput, BuildOutput, BuildSpec};
