//! Snapshot Policy Engine (C10 of `spec.md`): triggers snapshots by
//! time/operation/change rules and enforces retention. See
//! `spec.md` §4.10, §6, §8.

mod engine;
mod error;
mod named;
mod retention;
mod triggers;
mod watcher;

pub use engine::PolicyEngine;
pub use error::{Error, Result};
pub use named::NamedSnapshotSpec;
pub use retention::{buckets, prune, RetentionPolicy};
pub use triggers::{ChangeKind, FileChangeTrigger, OperationTrigger, TimeOfDay, TimerTrigger};
pub use watcher::{FileChangeWatcher, ObservedChange};
