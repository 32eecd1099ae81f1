//! Placement policies (`spec.md` §4.8 "Placement").

use serde::{Deserialize, Serialize};

use crate::node::{Capacity, NodeRecord};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementPolicy {
    RoundRobin,
    LeastLoaded,
    ResourceBalanced,
    AffinityAware { preferred_nodes: Vec<String> },
}

/// What a capsule being placed needs from a candidate node.
#[derive(Clone, Debug, Default)]
pub struct PlacementConstraints {
    pub required: Capacity,
    /// Anti-affinity: none of these capsule ids may already be present
    /// on the chosen node.
    pub anti_affinity: Vec<String>,
}

/// Step 1 of `schedule`: nodes that are `Active`, have room for
/// `required`, and satisfy anti-affinity.
pub fn filter_candidates<'a>(nodes: &'a [NodeRecord], constraints: &PlacementConstraints) -> Vec<&'a NodeRecord> {
    nodes
        .iter()
        .filter(|n| n.state == crate::node::NodeState::Active)
        .filter(|n| n.can_fit(&constraints.required))
        .filter(|n| !constraints.anti_affinity.iter().any(|id| n.capsules.contains(id)))
        .collect()
}

/// Step 2: pick one candidate according to `policy`. `ts` is the
/// monotonic tick used by `round-robin`'s `index = ts mod n`
/// (`spec.md` §4.8); callers pass a counter rather than wall-clock
/// time, since `capsule-core`'s clock helpers are deliberately kept
/// out of hot scheduling paths.
pub fn choose<'a>(candidates: &[&'a NodeRecord], policy: &PlacementPolicy, ts: u64) -> Option<&'a NodeRecord> {
    if candidates.is_empty() {
        return None;
    }
    match policy {
        PlacementPolicy::RoundRobin => {
            let index = (ts as usize) % candidates.len();
            Some(candidates[index])
        }
        PlacementPolicy::LeastLoaded => candidates
            .iter()
            .copied()
            .min_by(|a, b| a.cpu_utilization().total_cmp(&b.cpu_utilization())),
        PlacementPolicy::ResourceBalanced => candidates
            .iter()
            .copied()
            .min_by(|a, b| utilization_variance(a).total_cmp(&utilization_variance(b))),
        PlacementPolicy::AffinityAware { preferred_nodes } => preferred_nodes
            .iter()
            .find_map(|id| candidates.iter().copied().find(|n| &n.node_id == id))
            .or_else(|| choose(candidates, &PlacementPolicy::LeastLoaded, ts)),
    }
}

/// Variance of CPU/memory/storage utilization, the quantity
/// `resource-balanced` minimizes (`spec.md` §4.8).
fn utilization_variance(node: &NodeRecord) -> f64 {
    let cpu = ratio(node.used.cpu_cores, node.capacity.cpu_cores);
    let mem = ratio(node.used.memory_gb, node.capacity.memory_gb);
    let storage = ratio(node.used.storage_gb, node.capacity.storage_gb);
    let mean = (cpu + mem + storage) / 3.0;
    ((cpu - mean).powi(2) + (mem - mean).powi(2) + (storage - mean).powi(2)) / 3.0
}

fn ratio(used: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 {
        0.0
    } else {
        used / capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRecord;

    fn node(id: &str, cpu_cap: f64, cpu_used: f64) -> NodeRecord {
        let mut n = NodeRecord::joining(id, "127.0.0.1", 9000, Capacity {
            cpu_cores: cpu_cap,
            memory_gb: 64.0,
            storage_gb: 500.0,
        });
        n.state = crate::node::NodeState::Active;
        n.used.cpu_cores = cpu_used;
        n
    }

    #[test]
    fn least_loaded_picks_lowest_utilization() {
        let nodes = vec![node("a", 8.0, 6.0), node("b", 8.0, 2.0)];
        let candidates: Vec<&NodeRecord> = nodes.iter().collect();
        let chosen = choose(&candidates, &PlacementPolicy::LeastLoaded, 0).unwrap();
        assert_eq!(chosen.node_id, "b");
    }

    #[test]
    fn round_robin_cycles_by_ts() {
        let nodes = vec![node("a", 8.0, 0.0), node("b", 8.0, 0.0), node("c", 8.0, 0.0)];
        let candidates: Vec<&NodeRecord> = nodes.iter().collect();
        assert_eq!(choose(&candidates, &PlacementPolicy::RoundRobin, 0).unwrap().node_id, "a");
        assert_eq!(choose(&candidates, &PlacementPolicy::RoundRobin, 1).unwrap().node_id, "b");
        assert_eq!(choose(&candidates, &PlacementPolicy::RoundRobin, 4).unwrap().node_id, "b");
    }

    #[test]
    fn filter_excludes_nodes_without_capacity() {
        let nodes = vec![node("a", 2.0, 1.9)];
        let constraints = PlacementConstraints {
            required: Capacity { cpu_cores: 1.0, memory_gb: 1.0, storage_gb: 1.0 },
            anti_affinity: Vec::new(),
        };
        assert!(filter_candidates(&nodes, &constraints).is_empty());
    }

    #[test]
    fn filter_excludes_draining_and_maintenance_nodes() {
        let mut draining = node("a", 8.0, 0.0);
        draining.state = crate::node::NodeState::Draining;
        let mut maintenance = node("b", 8.0, 0.0);
        maintenance.state = crate::node::NodeState::Maintenance;
        let nodes = vec![draining, maintenance];
        let constraints = PlacementConstraints::default();
        assert!(filter_candidates(&nodes, &constraints).is_empty());
    }
}
