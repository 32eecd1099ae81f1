//! Cluster Manager (C8 of `spec.md`): membership, leader election,
//! placement, rebalance, and failure handling. See `spec.md` §4.8, §8.

mod election;
mod error;
mod manager;
mod node;
mod placement;

pub use election::elect;
pub use error::{Error, Result};
pub use manager::{Assignment, ClusterManager, MigrationCandidate, DEFAULT_HEARTBEAT_TIMEOUT};
pub use node::{Capacity, NodeRecord, NodeState};
pub use placement::{choose, filter_candidates, PlacementConstraints, PlacementPolicy};
