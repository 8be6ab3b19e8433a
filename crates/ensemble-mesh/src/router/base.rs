//! # Router Base
//!
//! State and collaborator plumbing shared by every profile: the ledger, the
//! channel-to-peer bindings, the counters, and the failure / lock / ready
//! transitions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::domain::{
    invariant_route_well_formed, BackendError, ChannelEvent, ChannelIndex, ConnectivityLedger, Direction,
    EnsembleTopology, ExpectedCounters, FailureReason, MeshError, NodeRank, Route, RouterState,
};
use crate::ports::{EnsembleDelegate, MeshBackend};

/// Result of the profile-independent channel checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelScreen {
    /// New binding, continue with profile checks.
    Fresh,
    /// Same channel and peer already bound.
    Duplicate,
    /// Refuse the channel.
    Reject(String),
}

/// Shared router state.
pub struct RouterCore {
    topology: EnsembleTopology,
    ledger: ConnectivityLedger,
    state: RouterState,
    bindings: BTreeMap<ChannelIndex, NodeRank>,
    retired: BTreeSet<ChannelIndex>,
    backend: Arc<dyn MeshBackend>,
    delegate: Arc<dyn EnsembleDelegate>,
}

impl RouterCore {
    /// Core with the given initial expectations.
    pub fn new(
        topology: EnsembleTopology,
        expected: ExpectedCounters,
        backend: Arc<dyn MeshBackend>,
        delegate: Arc<dyn EnsembleDelegate>,
    ) -> Self {
        Self {
            topology,
            ledger: ConnectivityLedger::new(),
            state: RouterState::new(expected),
            bindings: BTreeMap::new(),
            retired: BTreeSet::new(),
            backend,
            delegate,
        }
    }

    /// Local rank.
    pub fn rank(&self) -> NodeRank {
        self.topology.self_rank()
    }

    /// Static ensemble structure.
    pub fn topology(&self) -> &EnsembleTopology {
        &self.topology
    }

    /// Per-peer bookkeeping.
    pub fn ledger(&self) -> &ConnectivityLedger {
        &self.ledger
    }

    /// Counters and phase.
    pub fn state(&self) -> &RouterState {
        &self.state
    }

    /// Result delegate.
    pub fn delegate(&self) -> &dyn EnsembleDelegate {
        self.delegate.as_ref()
    }

    /// Check if the ensemble failed.
    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    /// Peer bound to `channel`.
    pub fn peer_on(&self, channel: ChannelIndex) -> Option<NodeRank> {
        self.bindings.get(&channel).copied()
    }

    /// Channel `peer` is bound to.
    pub fn channel_of(&self, peer: NodeRank) -> Option<ChannelIndex> {
        self.bindings
            .iter()
            .find(|(_, bound)| **bound == peer)
            .map(|(channel, _)| *channel)
    }

    /// Peers with a confirmed direct transmit path, in rank order.
    pub fn direct_peers(&self) -> Vec<NodeRank> {
        self.ledger
            .routes()
            .keys()
            .copied()
            .filter(|peer| self.ledger.route(*peer).is_some_and(|r| r.hop_count() == 1))
            .collect()
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Move to `Failed` and notify the delegate, once.
    pub fn fail(&mut self, reason: FailureReason) {
        if self.state.mark_failed() {
            error!(rank = self.rank(), %reason, "[mesh] ensemble failed");
            self.delegate.ensemble_failed(&reason);
        } else {
            debug!(rank = self.rank(), %reason, "[mesh] already failed");
        }
    }

    /// Fail with a protocol violation and return the matching error.
    pub fn violation(&mut self, detail: impl Into<String>) -> MeshError {
        let detail = detail.into();
        self.fail(FailureReason::ProtocolViolation(detail.clone()));
        MeshError::violation(self.rank(), detail)
    }

    fn backend_failed(&mut self, err: BackendError) {
        self.fail(FailureReason::BackendFailure(err));
    }

    /// Ask the backend to transmit `source`'s data on `channel`.
    ///
    /// Returns `false` (and fails the router) if the backend refuses.
    pub fn establish(&mut self, source: NodeRank, channel: ChannelIndex) -> bool {
        debug!(rank = self.rank(), source, channel, "[mesh] establish transmit");
        match self.backend.establish_transmit(source, channel) {
            Ok(()) => true,
            Err(err) => {
                self.backend_failed(err);
                false
            }
        }
    }

    /// Raise the tx expectation.
    pub fn raise_expected_tx(&mut self, extra: usize) -> usize {
        self.state.raise_tx(extra)
    }

    /// Count one network link.
    pub fn complete_network(&mut self) -> Result<usize, MeshError> {
        self.state.complete_network().map_err(|e| self.violation(e.to_string()))
    }

    /// Lock the backend once the local mesh is complete, then signal readiness
    /// if nothing else is outstanding.
    pub fn lock_and_signal(&mut self) {
        if self.is_failed() || !self.state.expected().mesh_complete() {
            return;
        }
        if !self.state.is_locked() {
            if let Err(err) = self.backend.lock() {
                self.backend_failed(err);
                return;
            }
            self.state.mark_locked();
            info!(rank = self.rank(), "[mesh] mesh configuration locked");
        }
        self.signal_if_ready();
    }

    /// Signal `ensemble_ready` the first time everything is complete.
    pub fn signal_if_ready(&mut self) {
        if self.state.is_locked() && self.state.is_ready() && self.state.mark_ready() {
            info!(rank = self.rank(), "[mesh] ensemble ready");
            self.delegate.ensemble_ready();
        }
    }

    // =========================================================================
    // CHANNELS
    // =========================================================================

    /// Profile-independent checks for a `connected=true` channel event.
    pub fn screen_channel(&self, event: &ChannelEvent) -> ChannelScreen {
        let me = self.rank();
        if self.retired.contains(&event.channel) {
            return ChannelScreen::Reject(format!("channel {} was invalidated", event.channel));
        }
        if event.peer == me {
            return ChannelScreen::Reject("peer is the local node".to_string());
        }
        let Some(chassis) = self.topology.chassis_of(event.peer) else {
            return ChannelScreen::Reject(format!("rank {} is not an ensemble member", event.peer));
        };
        if chassis != event.peer_chassis {
            return ChannelScreen::Reject(format!(
                "rank {} reports chassis {} but belongs to {}",
                event.peer, event.peer_chassis, chassis
            ));
        }
        if !self.topology.same_partition(me, event.peer) {
            return ChannelScreen::Reject(format!("rank {} is in another partition", event.peer));
        }
        match self.peer_on(event.channel) {
            Some(bound) if bound == event.peer => return ChannelScreen::Duplicate,
            Some(bound) => {
                return ChannelScreen::Reject(format!("channel {} already bound to rank {}", event.channel, bound))
            }
            None => {}
        }
        if self.state.is_locked() {
            return ChannelScreen::Reject(format!("mesh locked, channel {} not needed", event.channel));
        }
        if let Some(existing) = self.channel_of(event.peer) {
            return ChannelScreen::Reject(format!("rank {} already bound to channel {}", event.peer, existing));
        }
        ChannelScreen::Fresh
    }

    /// Disable a refused channel. The ensemble keeps forming.
    pub fn reject_channel(&mut self, channel: ChannelIndex, reason: &str) {
        warn!(rank = self.rank(), channel, reason, "[mesh] rejecting channel");
        if let Err(err) = self.backend.disable_channel(channel) {
            self.backend_failed(err);
        }
    }

    /// Bind `channel` to `peer` and create its ledger entry.
    pub fn bind_channel(&mut self, channel: ChannelIndex, peer: NodeRank) {
        self.bindings.insert(channel, peer);
        self.ledger.ensure(peer);
        debug!(rank = self.rank(), channel, peer, "[mesh] channel bound");
    }

    /// Handle a `connected=false` channel event.
    pub fn channel_lost(&mut self, channel: ChannelIndex) {
        match self.bindings.remove(&channel) {
            Some(peer) => {
                self.retired.insert(channel);
                self.fail(FailureReason::ChannelLost { channel, peer });
            }
            None => debug!(rank = self.rank(), channel, "[mesh] unbound channel went away"),
        }
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Apply a completed connection to the ledger and counters.
    ///
    /// Returns the peer bound to the event's channel (the receiver for tx).
    pub fn record_connection(
        &mut self,
        direction: Direction,
        channel: ChannelIndex,
        source: NodeRank,
    ) -> Result<NodeRank, MeshError> {
        let me = self.rank();
        let Some(bound) = self.peer_on(channel) else {
            return Err(self.violation(format!("{} completion on undiscovered channel {}", direction, channel)));
        };
        if !self.topology.is_member(source) {
            return Err(self.violation(format!("{} completion names unknown rank {}", direction, source)));
        }
        match direction {
            Direction::Rx => {
                if source == me {
                    return Err(self.violation(format!("rx of local data on channel {}", channel)));
                }
                if let Err(err) = self.ledger.set_input(source, channel) {
                    return Err(self.violation(err.to_string()));
                }
            }
            Direction::Tx => {
                if source == bound {
                    return Err(self.violation(format!("tx relays rank {} back to itself", source)));
                }
                self.ledger.push_output(bound, channel);
                if source == me {
                    self.ledger.set_route(bound, Route::direct(me, bound));
                }
            }
        }
        let remaining = self.state.complete(direction).map_err(|e| self.violation(e.to_string()))?;
        debug!(rank = me, %direction, channel, source, remaining, "[mesh] connection complete");
        Ok(bound)
    }

    /// Extend the forwarder's route by `receiver`.
    pub fn learn_route(&mut self, forwarder: NodeRank, receiver: NodeRank) -> Result<(), MeshError> {
        let me = self.rank();
        if !self.topology.is_member(forwarder) || !self.topology.is_member(receiver) {
            return Err(self.violation(format!("forward names unknown rank ({} -> {})", forwarder, receiver)));
        }
        let Some(base) = self.ledger.route(forwarder).cloned() else {
            return Err(self.violation(format!("forward via rank {} before its route is known", forwarder)));
        };
        let route = base.extended(receiver);
        if let Err(detail) = invariant_route_well_formed(me, receiver, &route) {
            return Err(self.violation(detail));
        }
        let rendered = route.to_string();
        if self.ledger.set_route(receiver, route) {
            debug!(rank = me, receiver, route = %rendered, "[mesh] route learned");
        } else {
            debug!(rank = me, receiver, "[mesh] route already known, keeping first");
        }
        Ok(())
    }
}
