//! # Domain Services
//!
//! Pure relay-selection helpers used by the forwarding rules.

use super::value_objects::NodeRank;

/// Which partner-chassis inner node an outer node relays into its chassis.
///
/// Both outer nodes of a chassis receive the same two candidates. The lower
/// ranked outer node takes the higher candidate and the higher ranked outer
/// node takes the lower one, so the pair covers both without overlap.
///
/// Returns `None` unless exactly two distinct candidates are given.
pub fn relay_candidate(self_rank: NodeRank, other_outer: NodeRank, candidates: &[NodeRank]) -> Option<NodeRank> {
    let [a, b] = candidates else {
        return None;
    };
    if a == b {
        return None;
    }
    let (low, high) = if a < b { (*a, *b) } else { (*b, *a) };
    if other_outer < self_rank {
        Some(low)
    } else {
        Some(high)
    }
}

/// Chassis peers that are not outer nodes.
pub fn inner_peers(chassis_peers: &[NodeRank], other_outer: NodeRank) -> Vec<NodeRank> {
    chassis_peers
        .iter()
        .copied()
        .filter(|rank| *rank != other_outer)
        .collect()
}
