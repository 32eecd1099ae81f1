//! The Cluster Manager (C8 of `spec.md`): membership, leader election,
//! placement, rebalance, and failure handling (§4.8).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capsule_core::{log_info, log_warn, Scope};
use capsule_fabric::Fabric;
use capsule_quota::{QuotaManager, ResourceKind, Scope as QuotaScope};
use capsule_runtime::{CapsuleConfig, CapsuleRuntime};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::node::{Capacity, NodeRecord, NodeState};
use crate::placement::{choose, filter_candidates, PlacementConstraints, PlacementPolicy};

/// `spec.md` §4.8: "considered `Failed` after a fixed heartbeat
/// timeout (default 30 s)".
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overloaded/underloaded thresholds for rebalance (`spec.md` §4.8).
const OVERLOADED_CPU_UTILIZATION: f64 = 0.8;
const MIGRATION_TARGET_CPU_UTILIZATION: f64 = 0.5;

#[derive(Clone, Debug)]
pub struct Assignment {
    pub capsule_id: String,
    pub node_id: String,
    pub required: Capacity,
    pub config: CapsuleConfig,
}

/// A capsule on an overloaded node that could move to `target_node_id`
/// to relieve pressure (`spec.md` §4.8 "Rebalance"). Identifying the
/// candidate is this crate's job; the caller performs the actual move
/// via `capsule_snapshot::migrate` between the two nodes' runtimes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationCandidate {
    pub capsule_id: String,
    pub source_node_id: String,
    pub target_node_id: String,
}

pub struct ClusterManager {
    local_node_id: String,
    nodes: Mutex<BTreeMap<String, NodeRecord>>,
    leader: Mutex<Option<String>>,
    assignments: Mutex<BTreeMap<String, Assignment>>,
    quota: Arc<QuotaManager>,
    runtime: Arc<CapsuleRuntime>,
    fabric: Arc<Fabric>,
    tick: AtomicU64,
    scope: Scope,
}

impl ClusterManager {
    pub fn new(
        local_node_id: impl Into<String>,
        local_capacity: Capacity,
        quota: Arc<QuotaManager>,
        runtime: Arc<CapsuleRuntime>,
        fabric: Arc<Fabric>,
    ) -> Self {
        let local_node_id = local_node_id.into();
        let mut nodes = BTreeMap::new();
        let mut local = NodeRecord::joining(local_node_id.clone(), "127.0.0.1", 0, local_capacity);
        local.state = NodeState::Active;
        nodes.insert(local_node_id.clone(), local);

        Self {
            scope: Scope::new("cluster", local_node_id.clone()),
            local_node_id,
            nodes: Mutex::new(nodes),
            leader: Mutex::new(None),
            assignments: Mutex::new(BTreeMap::new()),
            quota,
            runtime,
            fabric,
        }
    }

    /// A remote node's first contact: registered `Joining` until its
    /// first successful heartbeat promotes it (`spec.md` §4.8).
    pub async fn join(&self, node_id: impl Into<String>, address: impl Into<String>, port: u16, capacity: Capacity) {
        let node_id = node_id.into();
        let record = NodeRecord::joining(node_id.clone(), address, port, capacity);
        self.nodes.lock().await.insert(node_id.clone(), record);
        log_info!(&self.scope, node_id = %node_id, "node joining cluster");
        self.maybe_elect().await;
    }

    /// Record a heartbeat from `node_id`, promoting it to `Active` on
    /// first contact (`spec.md` §4.8).
    pub async fn heartbeat(&self, node_id: &str, usage: Capacity) -> Result<()> {
        let mut guard = self.nodes.lock().await;
        let node = guard.get_mut(node_id).ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        node.last_heartbeat = capsule_core::time::now();
        node.used = usage;
        if node.state != NodeState::Active {
            node.state = NodeState::Active;
            log_info!(&self.scope, node_id = %node_id, "node active");
        }
        drop(guard);
        self.maybe_elect().await;
        Ok(())
    }

    /// Operator-initiated transition into or out of `Draining`/
    /// `Maintenance` (`spec.md` §3's node state model). Moving a node
    /// into either state takes it out of `filter_candidates`
    /// eligibility and out of `check_failures`' heartbeat-timeout scan
    /// immediately, the same way `Failed` already is excluded from
    /// both — without this, an operator has no way to take a node
    /// quiet ahead of maintenance, and it would otherwise sit `Active`
    /// and eventually be marked `Failed` by the heartbeat timer.
    pub async fn set_node_state(&self, node_id: &str, state: NodeState) -> Result<()> {
        {
            let mut guard = self.nodes.lock().await;
            let node = guard.get_mut(node_id).ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
            node.state = state;
        }
        log_info!(&self.scope, node_id = %node_id, state = ?state, "node state set");
        self.maybe_elect().await;
        Ok(())
    }

    /// Scan for nodes that haven't heartbeated within `timeout` and
    /// transition them to `Failed`, dropping their usage and
    /// rescheduling their assignments (`spec.md` §4.8 "Failure
    /// handling"). Returns the ids of newly failed nodes.
    pub async fn check_failures(&self, timeout: Duration) -> Result<Vec<String>> {
        let now = capsule_core::time::now();
        let mut newly_failed = Vec::new();
        {
            let mut guard = self.nodes.lock().await;
            for node in guard.values_mut() {
                if node.state == NodeState::Active {
                    let age = now.signed_duration_since(node.last_heartbeat);
                    if age.to_std().unwrap_or(Duration::ZERO) > timeout {
                        node.state = NodeState::Failed;
                        node.used = Capacity::default();
                        newly_failed.push(node.node_id.clone());
                    }
                }
            }
        }

        for node_id in &newly_failed {
            log_warn!(&self.scope, node_id = %node_id, "node failed, heartbeat timeout exceeded");
            self.reschedule_assignments_of(node_id).await?;
        }
        if !newly_failed.is_empty() {
            self.maybe_elect().await;
        }
        Ok(newly_failed)
    }

    pub async fn leader(&self) -> Option<String> {
        self.leader.lock().await.clone()
    }

    /// Re-run the election if there is no leader, or the current
    /// leader is no longer `Active` (`spec.md` §4.8 "A new election is
    /// triggered whenever the current leader's entry transitions to
    /// `Failed` or on join when no leader exists").
    async fn maybe_elect(&self) {
        let nodes: Vec<NodeRecord> = self.nodes.lock().await.values().cloned().collect();
        let mut leader = self.leader.lock().await;
        let needs_election = match leader.as_ref() {
            None => true,
            Some(id) => nodes.iter().find(|n| &n.node_id == id).map(|n| n.state != NodeState::Active).unwrap_or(true),
        };
        if needs_election {
            let elected = crate::election::elect(&nodes);
            if elected != *leader {
                log_info!(&self.scope, leader = ?elected, "leader election");
            }
            *leader = elected;
        }
    }

    /// `schedule(capsule, constraints, policy)` (`spec.md` §4.8
    /// "Placement"): filter eligible nodes, apply `policy`, debit the
    /// chosen node's usage and the quota manager, record the
    /// assignment, and forward a `DEPLOY_CAPSULE` control message if
    /// the chosen node isn't this one.
    pub async fn schedule(
        &self,
        capsule_id: impl Into<String>,
        config: CapsuleConfig,
        constraints: PlacementConstraints,
        policy: &PlacementPolicy,
        quota_scopes: &[QuotaScope],
    ) -> Result<String> {
        let capsule_id = capsule_id.into();
        let ts = self.tick.fetch_add(1, Ordering::Relaxed);

        let chosen_node_id = {
            let guard = self.nodes.lock().await;
            let nodes: Vec<NodeRecord> = guard.values().cloned().collect();
            let candidates = filter_candidates(&nodes, &constraints);
            choose(&candidates, policy, ts)
                .map(|n| n.node_id.clone())
                .ok_or_else(|| Error::NoEligibleNode(capsule_id.clone()))?
        };

        self.quota.allocate(quota_scopes, ResourceKind::Cpu, constraints.required.cpu_cores as u64).await?;
        self.quota
            .allocate(quota_scopes, ResourceKind::Memory, constraints.required.memory_gb as u64)
            .await?;
        self.quota
            .allocate(quota_scopes, ResourceKind::Storage, constraints.required.storage_gb as u64)
            .await?;

        {
            let mut guard = self.nodes.lock().await;
            let node = guard.get_mut(&chosen_node_id).expect("chosen from current node set");
            node.used.cpu_cores += constraints.required.cpu_cores;
            node.used.memory_gb += constraints.required.memory_gb;
            node.used.storage_gb += constraints.required.storage_gb;
            node.capsules.push(capsule_id.clone());
        }

        self.assignments.lock().await.insert(
            capsule_id.clone(),
            Assignment {
                capsule_id: capsule_id.clone(),
                node_id: chosen_node_id.clone(),
                required: constraints.required,
                config: config.clone(),
            },
        );

        if chosen_node_id == self.local_node_id {
            self.runtime.create_with_id(capsule_id.clone(), config).await?;
        } else {
            self.fabric.send_deploy_capsule(&chosen_node_id, capsule_id.clone()).await?;
        }

        log_info!(&self.scope, capsule_id = %capsule_id, node_id = %chosen_node_id, "capsule scheduled");
        Ok(chosen_node_id)
    }

    /// `spec.md` §4.8 "Rebalance": nodes over 0.8 per-core utilization
    /// are overloaded; for each of their capsules, look for a node
    /// under 0.5 utilization with room for the assignment.
    pub async fn rebalance(&self) -> Vec<MigrationCandidate> {
        let nodes: Vec<NodeRecord> = self.nodes.lock().await.values().cloned().collect();
        let assignments = self.assignments.lock().await;
        let mut candidates = Vec::new();

        for node in nodes.iter().filter(|n| n.state == NodeState::Active && n.cpu_utilization() > OVERLOADED_CPU_UTILIZATION) {
            for capsule_id in &node.capsules {
                let Some(assignment) = assignments.get(capsule_id) else { continue };
                let target = nodes
                    .iter()
                    .filter(|n| n.node_id != node.node_id && n.state == NodeState::Active)
                    .filter(|n| n.cpu_utilization() < MIGRATION_TARGET_CPU_UTILIZATION)
                    .filter(|n| n.can_fit(&assignment.required))
                    .min_by(|a, b| a.cpu_utilization().total_cmp(&b.cpu_utilization()));
                if let Some(target) = target {
                    candidates.push(MigrationCandidate {
                        capsule_id: capsule_id.clone(),
                        source_node_id: node.node_id.clone(),
                        target_node_id: target.node_id.clone(),
                    });
                }
            }
        }
        candidates
    }

    async fn reschedule_assignments_of(&self, failed_node_id: &str) -> Result<()> {
        let to_reschedule: Vec<Assignment> = {
            let assignments = self.assignments.lock().await;
            assignments.values().filter(|a| a.node_id == failed_node_id).cloned().collect()
        };

        for assignment in to_reschedule {
            let nodes: Vec<NodeRecord> = self.nodes.lock().await.values().cloned().collect();
            let constraints = PlacementConstraints {
                required: assignment.required,
                anti_affinity: Vec::new(),
            };
            let candidates = filter_candidates(&nodes, &constraints);
            let Some(target) = choose(&candidates, &PlacementPolicy::LeastLoaded, 0) else {
                log_warn!(&self.scope, capsule_id = %assignment.capsule_id, "no eligible node to reschedule onto");
                continue;
            };
            let target_id = target.node_id.clone();

            {
                let mut guard = self.nodes.lock().await;
                if let Some(node) = guard.get_mut(&target_id) {
                    node.used.cpu_cores += assignment.required.cpu_cores;
                    node.used.memory_gb += assignment.required.memory_gb;
                    node.used.storage_gb += assignment.required.storage_gb;
                    node.capsules.push(assignment.capsule_id.clone());
                }
            }

            self.assignments.lock().await.insert(
                assignment.capsule_id.clone(),
                Assignment {
                    node_id: target_id.clone(),
                    ..assignment.clone()
                },
            );
            log_info!(&self.scope, capsule_id = %assignment.capsule_id, new_node_id = %target_id, "assignment rescheduled after node failure");
        }
        Ok(())
    }

    pub async fn node(&self, node_id: &str) -> Result<NodeRecord> {
        self.nodes
            .lock()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))
    }

    pub async fn assignment(&self, capsule_id: &str) -> Result<Assignment> {
        self.assignments
            .lock()
            .await
            .get(capsule_id)
            .cloned()
            .ok_or_else(|| Error::AssignmentNotFound(capsule_id.to_string()))
    }
}
