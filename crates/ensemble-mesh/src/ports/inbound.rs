//! # Driving Ports (Inbound API)
//!
//! What a router exposes to the link layer, the backend and the messaging
//! transport.
//!
//! All operations must be called from one serialized context per router; the
//! state machine is not internally synchronized.

use crate::codec::Outbox;
use crate::domain::{
    ChannelEvent, ConnectionEvent, ExpectedCounters, FailureReason, MeshError, NetworkConnectionEvent, NodeRank,
    ProfileKind, RouteMap, RouterPhase, TransferMap,
};

/// Point-in-time copy of a router's observable state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterSnapshot {
    /// Local rank.
    pub rank: NodeRank,
    /// Topology profile.
    pub profile: ProfileKind,
    /// Lifecycle phase.
    pub phase: RouterPhase,
    /// Outstanding connections.
    pub expected: ExpectedCounters,
    /// Backend configuration locked.
    pub locked: bool,
    /// Cross-chassis peer discovered at runtime, if any.
    pub cross_chassis_partner: Option<NodeRank>,
    /// Per-peer channel data.
    pub transfer_map: TransferMap,
    /// Per-peer rendered routes.
    pub routes: RouteMap,
    /// Partition partners with a live network link.
    pub network_peers: Vec<NodeRank>,
}

/// Per-node topology-formation state machine.
///
/// Each operation returns the control messages the transition produced. The
/// caller sends them after the call returns; see
/// [`EnsembleService`](crate::service::EnsembleService).
///
/// Link failures do not return `Err`: they move the router to
/// [`RouterPhase::Failed`] and notify the delegate. `Err` is reserved for
/// protocol violations (which also fail the router) and for events the
/// profile does not support (which do not).
pub trait EnsembleRouter: Send {
    /// Topology profile implemented.
    fn profile(&self) -> ProfileKind;

    /// Local rank.
    fn rank(&self) -> NodeRank;

    /// A local physical slot observed or lost a peer.
    fn on_channel_event(&mut self, event: ChannelEvent) -> Result<Outbox, MeshError>;

    /// The backend completed or lost an rx/tx connection.
    fn on_connection_event(&mut self, event: ConnectionEvent) -> Result<Outbox, MeshError>;

    /// A peer reported it now relays our data to `receiver`.
    fn on_forward_message(&mut self, forwarder: NodeRank, receiver: NodeRank) -> Result<Outbox, MeshError>;

    /// A peer announced it holds a cross-chassis link.
    fn on_outer_node_announce(&mut self, node_id: NodeRank, chassis_id: &str) -> Result<Outbox, MeshError>;

    /// A long-haul network link came up or went down.
    fn on_network_connection_event(&mut self, event: NetworkConnectionEvent) -> Result<Outbox, MeshError>;

    /// Fail the ensemble for a reason detected outside the router.
    fn report_failure(&mut self, reason: FailureReason);

    /// Lifecycle phase.
    fn phase(&self) -> RouterPhase;

    /// Outstanding connections.
    fn expected(&self) -> ExpectedCounters;

    /// Not failed and nothing outstanding.
    fn is_ready(&self) -> bool;

    /// Per-peer channel data.
    fn transfer_map(&self) -> TransferMap;

    /// Per-peer rendered routes.
    fn routes(&self) -> RouteMap;

    /// Full observable state.
    fn snapshot(&self) -> RouterSnapshot;
}
