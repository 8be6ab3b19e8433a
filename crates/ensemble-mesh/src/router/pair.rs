//! Two-node profile: one direct link, nothing to forward.

use super::{ProfileRules, RouterCore};
use crate::domain::{EnsembleTopology, ExpectedCounters, MeshError, ProfileKind};

/// Rules for a two-node ensemble.
#[derive(Debug, Default)]
pub struct PairRules;

impl ProfileRules for PairRules {
    const KIND: ProfileKind = ProfileKind::Pair;

    fn expected_counters(topology: &EnsembleTopology) -> ExpectedCounters {
        ExpectedCounters::new(topology.expected_rx(), topology.base_expected_tx(), 0)
    }

    fn initialize(_core: &mut RouterCore) -> Result<Self, MeshError> {
        Ok(Self)
    }
}
