//! # Domain Invariants
//!
//! Rules that must hold for every router regardless of profile.

use super::state::RouterState;
use super::value_objects::{NodeRank, Route};

/// Invariant: a route starts at the local node, ends at its peer and never
/// revisits a hop.
pub fn invariant_route_well_formed(self_rank: NodeRank, peer: NodeRank, route: &Route) -> Result<(), String> {
    let hops = route.hops();
    if hops.first() != Some(&self_rank) {
        return Err(format!("route {} does not start at rank {}", route, self_rank));
    }
    if route.destination() != Some(peer) {
        return Err(format!("route {} does not end at rank {}", route, peer));
    }
    for (i, hop) in hops.iter().enumerate() {
        if hops[i + 1..].contains(hop) {
            return Err(format!("route {} revisits rank {}", route, hop));
        }
    }
    Ok(())
}

/// Invariant: readiness holds exactly when nothing is outstanding and the
/// router has not failed.
pub fn invariant_ready_iff_complete(state: &RouterState) -> bool {
    let complete = !state.is_failed() && state.expected().all_complete();
    state.is_ready() == complete
}

/// Invariant: the backend is only locked once the local mesh is complete.
pub fn invariant_lock_after_mesh(state: &RouterState) -> bool {
    !state.is_locked() || state.expected().mesh_complete()
}
