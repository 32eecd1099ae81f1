//! Snapshot & Migration (C6 of `spec.md`): consistent capsule
//! snapshots, restore, live migration, and instant rollback (§4.6).

pub mod engine;
pub mod error;
pub mod migration;
pub mod rollback;
pub mod snapshot;
pub mod state;

pub use engine::SnapshotEngine;
pub use error::{Error, Result};
pub use migration::{migrate, AlwaysHealthy, HealthCheck, MigrationOutcome};
pub use rollback::rollback_to;
pub use snapshot::Snapshot;
pub use state::{ConnectionState, FdEntry, InterfaceState, NetworkState, ProcessState, ThreadState};
