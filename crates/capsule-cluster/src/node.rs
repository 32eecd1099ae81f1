//! Node membership records (`spec.md` §4.8 "Membership").

use capsule_core::time::Timestamp;
use serde::{Deserialize, Serialize};

/// `spec.md` §3/§4.8: `Joining -> Active` after the first successful
/// heartbeat; `Active -> Failed` after a fixed heartbeat timeout. The
/// heartbeat timer is the only source of failure detection — there is
/// no separate liveness probe.
///
/// `Draining` and `Maintenance` are operator-set, not timer-driven: a
/// node an operator has taken quiet ahead of decommission or
/// maintenance is neither a placement candidate nor eligible for
/// heartbeat-timeout failure detection, the same way `Failed` nodes
/// are excluded from both (`filter_candidates`, `check_failures`) —
/// without a distinct state, such a node would sit `Active` and then
/// get flipped to `Failed` by the heartbeat timer once it goes quiet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Joining,
    Active,
    /// Operator-initiated: no new capsules are placed here, and the
    /// node is not failure-detected while draining.
    Draining,
    Failed,
    /// Operator-initiated: excluded from placement and failure
    /// detection for the duration of the maintenance window.
    Maintenance,
}

/// Resource capacity in the coarse `(cpu, memory, storage)` units
/// `spec.md` §4.8's placement filter reasons about — distinct from
/// `capsule_runtime::ResourceLimits`, which expresses per-capsule
/// cgroup caps.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Capacity {
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub storage_gb: f64,
}

/// A node's record in the cluster's membership table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub address: String,
    pub port: u16,
    pub state: NodeState,
    pub capacity: Capacity,
    pub used: Capacity,
    pub last_heartbeat: Timestamp,
    /// Capsule ids currently assigned to this node.
    pub capsules: Vec<String>,
}

impl NodeRecord {
    pub fn joining(node_id: impl Into<String>, address: impl Into<String>, port: u16, capacity: Capacity) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            port,
            state: NodeState::Joining,
            capacity,
            used: Capacity::default(),
            last_heartbeat: capsule_core::time::now(),
            capsules: Vec::new(),
        }
    }

    /// Per-core CPU utilization, the quantity `spec.md` §4.8's
    /// `least-loaded` policy and rebalance thresholds are defined over.
    pub fn cpu_utilization(&self) -> f64 {
        if self.capacity.cpu_cores <= 0.0 {
            return f64::INFINITY;
        }
        self.used.cpu_cores / self.capacity.cpu_cores
    }

    pub fn can_fit(&self, required: &Capacity) -> bool {
        self.used.cpu_cores + required.cpu_cores <= self.capacity.cpu_cores
            && self.used.memory_gb + required.memory_gb <= self.capacity.memory_gb
            && self.used.storage_gb + required.storage_gb <= self.capacity.storage_gb
    }
}
