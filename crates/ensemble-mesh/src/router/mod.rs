//! # Routers
//!
//! One state machine per profile, built from a shared [`RouterCore`] and a
//! [`ProfileRules`] implementation that contributes the profile deltas:
//!
//! | Profile   | rx | tx            | network        | forwarding rules |
//! |-----------|----|---------------|----------------|------------------|
//! | Pair      | 1  | 1             | 0              | none             |
//! | Cube      | 7  | 3, 11 if outer| 0              | three (outer)    |
//! | Hypercube | 7  | 7             | partitions - 1 | one              |
//!
//! Every transition returns the control messages it produced instead of
//! sending them, so ledger updates never interleave with transport calls.

pub mod base;
pub mod cube;
pub mod hypercube;
pub mod pair;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use base::{ChannelScreen, RouterCore};
pub use cube::CubeRules;
pub use hypercube::HypercubeRules;
pub use pair::PairRules;

use crate::codec::{ControlMessage, OutboundMessage, Outbox};
use crate::domain::{
    ChannelEvent, ConfigurationError, ConnectionEvent, Direction, EnsembleTopology, ExpectedCounters, FailureReason,
    MeshError, NetworkConnectionEvent, NodeRank, ProfileKind, RouteMap, RouterPhase, TransferMap,
};
use crate::ports::{EnsembleDelegate, EnsembleRouter, MeshBackend, RouterSnapshot};

/// Outcome of a profile's channel admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Bind the channel.
    Accept,
    /// Disable the channel.
    Reject(String),
}

/// Profile-specific deltas on top of the shared skeleton.
pub trait ProfileRules: Sized + Send {
    /// Profile implemented.
    const KIND: ProfileKind;

    /// Counters for a freshly constructed router.
    fn expected_counters(topology: &EnsembleTopology) -> ExpectedCounters;

    /// Build the profile state. Runs once, after the core exists.
    fn initialize(core: &mut RouterCore) -> Result<Self, MeshError>;

    /// Extra checks for a channel that passed the shared screen.
    fn admit_channel(&self, _core: &RouterCore, _event: &ChannelEvent) -> Admission {
        Admission::Accept
    }

    /// A channel was bound and its direct transmit requested.
    fn on_channel_accepted(&mut self, _core: &mut RouterCore, _event: &ChannelEvent, _outbox: &mut Outbox) {}

    /// A direct transmit toward `receiver` completed.
    fn on_direct_transmit(&mut self, _core: &mut RouterCore, _receiver: NodeRank, _outbox: &mut Outbox) {}

    /// Run the precondition-gated forwarding rules.
    fn setup_forwards(&mut self, _core: &mut RouterCore, _outbox: &mut Outbox) -> Result<(), MeshError> {
        Ok(())
    }

    /// A peer announced it holds a cross-chassis link.
    fn on_outer_node_announce(
        &mut self,
        _core: &mut RouterCore,
        _node_id: NodeRank,
        _chassis_id: &str,
        _outbox: &mut Outbox,
    ) -> Result<(), MeshError> {
        Err(MeshError::Unsupported {
            event: "OuterNodeAnnounce",
            profile: Self::KIND.name(),
        })
    }

    /// A long-haul network link changed state.
    fn on_network_connection(
        &mut self,
        _core: &mut RouterCore,
        _event: &NetworkConnectionEvent,
    ) -> Result<(), MeshError> {
        Err(MeshError::Unsupported {
            event: "NetworkConnectionEvent",
            profile: Self::KIND.name(),
        })
    }

    /// Cross-chassis peer discovered at runtime.
    fn cross_chassis_partner(&self) -> Option<NodeRank> {
        None
    }

    /// Partition partners with a live network link.
    fn network_peers(&self) -> Vec<NodeRank> {
        Vec::new()
    }
}

/// Router for one profile.
pub struct Router<P> {
    core: RouterCore,
    profile: P,
}

/// Two-node router.
pub type PairRouter = Router<PairRules>;
/// Eight-node, two-chassis router.
pub type CubeRouter = Router<CubeRules>;
/// Partitioned router with network links between partitions.
pub type HypercubeRouter = Router<HypercubeRules>;

impl<P: ProfileRules> Router<P> {
    /// Construct a router for `topology`.
    ///
    /// # Errors
    ///
    /// Fails if the topology was classified as a different profile or the
    /// profile cannot be initialised (e.g. a missing partner hostname).
    pub fn new(
        topology: EnsembleTopology,
        backend: Arc<dyn MeshBackend>,
        delegate: Arc<dyn EnsembleDelegate>,
    ) -> Result<Self, MeshError> {
        if topology.kind() != P::KIND {
            return Err(ConfigurationError::ProfileSizeMismatch {
                profile: P::KIND.name().to_string(),
                count: topology.len(),
            }
            .into());
        }
        let expected = P::expected_counters(&topology);
        let mut core = RouterCore::new(topology, expected, backend, delegate);
        let profile = P::initialize(&mut core)?;
        info!(
            rank = core.rank(),
            profile = P::KIND.name(),
            rx = expected.rx,
            tx = expected.tx,
            network = expected.network,
            "[mesh] router created"
        );
        Ok(Self { core, profile })
    }

    /// Shared state, for inspection.
    pub fn core(&self) -> &RouterCore {
        &self.core
    }

    /// Profile state, for inspection.
    pub fn rules(&self) -> &P {
        &self.profile
    }

    /// Lock once the mesh is complete, otherwise try the forwarding rules.
    fn advance(&mut self, outbox: &mut Outbox) -> Result<(), MeshError> {
        if self.core.is_failed() {
            return Ok(());
        }
        if self.core.state().expected().mesh_complete() {
            self.core.lock_and_signal();
            Ok(())
        } else {
            self.profile.setup_forwards(&mut self.core, outbox)
        }
    }

    fn ignored_after_failure(&self, event: &'static str) -> Result<Outbox, MeshError> {
        debug!(rank = self.core.rank(), event, "[mesh] ensemble failed, event ignored");
        Ok(Outbox::new())
    }
}

impl<P: ProfileRules> EnsembleRouter for Router<P> {
    fn profile(&self) -> ProfileKind {
        P::KIND
    }

    fn rank(&self) -> NodeRank {
        self.core.rank()
    }

    fn on_channel_event(&mut self, event: ChannelEvent) -> Result<Outbox, MeshError> {
        if self.core.is_failed() {
            return self.ignored_after_failure("channel");
        }
        if !event.connected {
            self.core.channel_lost(event.channel);
            return Ok(Outbox::new());
        }
        match self.core.screen_channel(&event) {
            ChannelScreen::Fresh => {}
            ChannelScreen::Duplicate => {
                warn!(
                    rank = self.core.rank(),
                    channel = event.channel,
                    peer = event.peer,
                    "[mesh] duplicate channel event ignored"
                );
                return Ok(Outbox::new());
            }
            ChannelScreen::Reject(reason) => {
                self.core.reject_channel(event.channel, &reason);
                return Ok(Outbox::new());
            }
        }
        if let Admission::Reject(reason) = self.profile.admit_channel(&self.core, &event) {
            self.core.reject_channel(event.channel, &reason);
            return Ok(Outbox::new());
        }

        let me = self.core.rank();
        self.core.bind_channel(event.channel, event.peer);
        let mut outbox = Outbox::new();
        if self.core.establish(me, event.channel) {
            self.profile.on_channel_accepted(&mut self.core, &event, &mut outbox);
        }
        Ok(outbox)
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) -> Result<Outbox, MeshError> {
        if self.core.is_failed() {
            return self.ignored_after_failure("connection");
        }
        if !event.connected {
            self.core.fail(FailureReason::ConnectionLost { peer: event.peer });
            return Ok(Outbox::new());
        }
        let me = self.core.rank();
        let bound = self.core.record_connection(event.direction, event.channel, event.peer)?;

        let mut outbox = Outbox::new();
        if event.direction == Direction::Tx {
            if event.peer == me {
                self.profile.on_direct_transmit(&mut self.core, bound, &mut outbox);
            } else {
                outbox.push(OutboundMessage::new(
                    event.peer,
                    ControlMessage::Forward {
                        forwarder: me,
                        receiver: bound,
                    },
                ));
            }
        }
        self.advance(&mut outbox)?;
        Ok(outbox)
    }

    fn on_forward_message(&mut self, forwarder: NodeRank, receiver: NodeRank) -> Result<Outbox, MeshError> {
        if self.core.is_failed() {
            return self.ignored_after_failure("forward");
        }
        if receiver == self.core.rank() {
            return Err(self.core.violation(format!("rank {} forwards our data back to us", forwarder)));
        }
        self.core.learn_route(forwarder, receiver)?;
        let mut outbox = Outbox::new();
        self.advance(&mut outbox)?;
        Ok(outbox)
    }

    fn on_outer_node_announce(&mut self, node_id: NodeRank, chassis_id: &str) -> Result<Outbox, MeshError> {
        if self.core.is_failed() {
            return self.ignored_after_failure("announce");
        }
        let mut outbox = Outbox::new();
        self.profile
            .on_outer_node_announce(&mut self.core, node_id, chassis_id, &mut outbox)?;
        self.advance(&mut outbox)?;
        Ok(outbox)
    }

    fn on_network_connection_event(&mut self, event: NetworkConnectionEvent) -> Result<Outbox, MeshError> {
        if self.core.is_failed() {
            return self.ignored_after_failure("network");
        }
        self.profile.on_network_connection(&mut self.core, &event)?;
        Ok(Outbox::new())
    }

    fn report_failure(&mut self, reason: FailureReason) {
        self.core.fail(reason);
    }

    fn phase(&self) -> RouterPhase {
        self.core.state().phase()
    }

    fn expected(&self) -> ExpectedCounters {
        self.core.state().expected()
    }

    fn is_ready(&self) -> bool {
        self.core.state().is_ready()
    }

    fn transfer_map(&self) -> TransferMap {
        self.core.ledger().transfer_map()
    }

    fn routes(&self) -> RouteMap {
        self.core.ledger().routes()
    }

    fn snapshot(&self) -> RouterSnapshot {
        let state = self.core.state();
        RouterSnapshot {
            rank: self.core.rank(),
            profile: P::KIND,
            phase: state.phase(),
            expected: state.expected(),
            locked: state.is_locked(),
            cross_chassis_partner: self.profile.cross_chassis_partner(),
            transfer_map: self.core.ledger().transfer_map(),
            routes: self.core.ledger().routes(),
            network_peers: self.profile.network_peers(),
        }
    }
}

/// Build the router matching the topology's profile.
pub fn build_router(
    topology: EnsembleTopology,
    backend: Arc<dyn MeshBackend>,
    delegate: Arc<dyn EnsembleDelegate>,
) -> Result<Box<dyn EnsembleRouter>, MeshError> {
    Ok(match topology.kind() {
        ProfileKind::Pair => Box::new(PairRouter::new(topology, backend, delegate)?),
        ProfileKind::Cube => Box::new(CubeRouter::new(topology, backend, delegate)?),
        ProfileKind::Hypercube => Box::new(HypercubeRouter::new(topology, backend, delegate)?),
    })
}
