//! Leader election (`spec.md` §4.8 "Leadership").
//!
//! `SPEC_FULL.md` §D resolves the Open Question on split-brain safety:
//! this is deliberately the simple, unsafe scheme the spec describes —
//! smallest-id-among-`Active` — with no quorum or fencing. Two
//! partitions that each see a different `Active` set will each elect
//! their own leader. A production cluster manager would need a
//! consensus protocol (Raft, or similar) to avoid this; this core
//! does not implement one, and callers driving real multi-node
//! clusters over an unreliable network should treat the elected
//! leader as advisory, not as a safety guarantee.

use crate::node::{NodeRecord, NodeState};

/// Elect the lexicographically smallest id among `Active` nodes, or
/// `None` if none are active.
pub fn elect(nodes: &[NodeRecord]) -> Option<String> {
    nodes
        .iter()
        .filter(|n| n.state == NodeState::Active)
        .map(|n| n.node_id.clone())
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Capacity;

    #[test]
    fn smallest_active_id_wins() {
        let mut a = NodeRecord::joining("node-b", "h", 1, Capacity::default());
        a.state = NodeState::Active;
        let mut b = NodeRecord::joining("node-a", "h", 1, Capacity::default());
        b.state = NodeState::Active;
        let mut c = NodeRecord::joining("node-aaa", "h", 1, Capacity::default());
        c.state = NodeState::Failed;

        assert_eq!(elect(&[a, b, c]), Some("node-a".to_string()));
    }

    #[test]
    fn no_active_nodes_means_no_leader() {
        let mut a = NodeRecord::joining("node-a", "h", 1, Capacity::default());
        a.state = NodeState::Failed;
        assert_eq!(elect(&[a]), None);
    }

    #[test]
    fn draining_and_maintenance_nodes_are_not_electable() {
        let mut a = NodeRecord::joining("node-a", "h", 1, Capacity::default());
        a.state = NodeState::Draining;
        let mut b = NodeRecord::joining("node-b", "h", 1, Capacity::default());
        b.state = NodeState::Maintenance;
        assert_eq!(elect(&[a, b]), None);
    }
}
