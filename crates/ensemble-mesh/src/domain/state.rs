//! # Router State
//!
//! Expected-connection counters and the one-way phase flags shared by every
//! profile.

use thiserror::Error;

use super::value_objects::{Direction, RouterPhase};

/// A completion arrived for a counter that is already at zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unexpected {kind} completion: no {kind} connections outstanding")]
pub struct CounterExhausted {
    /// Counter name
    pub kind: &'static str,
}

/// Outstanding connections.
///
/// Counts only move toward zero, except for the Cube outer-node revision
/// which raises `tx` once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpectedCounters {
    /// Outstanding rx completions.
    pub rx: usize,
    /// Outstanding tx completions.
    pub tx: usize,
    /// Outstanding long-haul network links.
    pub network: usize,
}

impl ExpectedCounters {
    /// Counters for a fresh router.
    pub fn new(rx: usize, tx: usize, network: usize) -> Self {
        Self { rx, tx, network }
    }

    /// Local mesh fully connected.
    pub fn mesh_complete(&self) -> bool {
        self.rx == 0 && self.tx == 0
    }

    /// Mesh and network fully connected.
    pub fn all_complete(&self) -> bool {
        self.mesh_complete() && self.network == 0
    }
}

/// Phase, counters and one-shot flags of a router.
#[derive(Clone, Debug, Default)]
pub struct RouterState {
    phase: RouterPhase,
    expected: ExpectedCounters,
    locked: bool,
}

impl RouterState {
    /// Fresh state in `Forming`.
    pub fn new(expected: ExpectedCounters) -> Self {
        Self {
            phase: RouterPhase::Forming,
            expected,
            locked: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RouterPhase {
        self.phase
    }

    /// Outstanding counts.
    pub fn expected(&self) -> ExpectedCounters {
        self.expected
    }

    /// Check if the ensemble failed.
    pub fn is_failed(&self) -> bool {
        self.phase == RouterPhase::Failed
    }

    /// Check if the backend configuration is locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Not failed and nothing outstanding.
    pub fn is_ready(&self) -> bool {
        !self.is_failed() && self.expected.all_complete()
    }

    /// Count one rx or tx completion.
    pub fn complete(&mut self, direction: Direction) -> Result<usize, CounterExhausted> {
        let (counter, kind) = match direction {
            Direction::Rx => (&mut self.expected.rx, "rx"),
            Direction::Tx => (&mut self.expected.tx, "tx"),
        };
        *counter = counter.checked_sub(1).ok_or(CounterExhausted { kind })?;
        Ok(*counter)
    }

    /// Count one network link.
    pub fn complete_network(&mut self) -> Result<usize, CounterExhausted> {
        self.expected.network = self
            .expected
            .network
            .checked_sub(1)
            .ok_or(CounterExhausted { kind: "network" })?;
        Ok(self.expected.network)
    }

    /// Raise the tx expectation (Cube outer discovery).
    pub fn raise_tx(&mut self, extra: usize) -> usize {
        self.expected.tx += extra;
        self.expected.tx
    }

    /// Record the backend lock.
    pub fn mark_locked(&mut self) {
        self.locked = true;
    }

    /// Move to `Ready`. Returns `true` on the first call only.
    pub fn mark_ready(&mut self) -> bool {
        if !self.phase.can_transition_to(RouterPhase::Ready) {
            return false;
        }
        self.phase = RouterPhase::Ready;
        true
    }

    /// Move to `Failed`. Returns `true` on the first call only.
    pub fn mark_failed(&mut self) -> bool {
        if !self.phase.can_transition_to(RouterPhase::Failed) {
            return false;
        }
        self.phase = RouterPhase::Failed;
        true
    }
}
