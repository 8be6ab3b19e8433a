//! # Cube Profile
//!
//! Eight nodes in two chassis of four. Two nodes per chassis hold a
//! cross-chassis link; they are the outer nodes and relay everything that
//! crosses between chassis.
//!
//! ```text
//!   chassis a            chassis b
//!   0 (outer) ══════════ 4 (outer)
//!   1 (outer) ══════════ 5 (outer)
//!   2, 3 (inner)         6, 7 (inner)
//! ```
//!
//! An outer node expects 8 more transmit paths than an inner node and runs
//! three once-only forwarding rules:
//!
//! 1. relay the outer partner to every chassis peer,
//! 2. relay both inner chassis peers to the outer partner,
//! 3. relay one partner-chassis inner node to both inner chassis peers.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::{Admission, ProfileRules, RouterCore};
use crate::codec::{ControlMessage, OutboundMessage, Outbox};
use crate::domain::{
    inner_peers, relay_candidate, ChannelEvent, ChannelIndex, EnsembleTopology, ExpectedCounters, MeshError,
    NodeRank, NodeRole, ProfileKind, CUBE_OUTER_EXTRA_TX,
};

/// Rules and runtime role of a Cube node.
#[derive(Debug, Default)]
pub struct CubeRules {
    role: NodeRole,
    known_outer: BTreeSet<NodeRank>,
    announced_to: BTreeSet<NodeRank>,
    partner_fanout: bool,
    inner_uplink: bool,
    cross_relay: bool,
}

impl CubeRules {
    /// Role discovered so far.
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Ranks that announced themselves as outer nodes.
    pub fn known_outer(&self) -> &BTreeSet<NodeRank> {
        &self.known_outer
    }

    /// The other outer node of the local chassis, once exactly one is known.
    pub fn other_outer(&self, core: &RouterCore) -> Option<NodeRank> {
        let peers = core.topology().chassis_peers(core.rank());
        let mut found = self.known_outer.iter().filter(|rank| peers.contains(rank));
        match (found.next(), found.next()) {
            (Some(rank), None) => Some(*rank),
            _ => None,
        }
    }

    fn announce(&mut self, core: &RouterCore, to: NodeRank, outbox: &mut Outbox) {
        if !self.announced_to.insert(to) {
            return;
        }
        debug!(rank = core.rank(), to, "[mesh] announcing outer node");
        outbox.push(OutboundMessage::new(
            to,
            ControlMessage::OuterNodeAnnounce {
                node_id: core.rank(),
                chassis_id: core.topology().self_chassis().to_string(),
            },
        ));
    }

    /// Rule 1. Returns `false` if the backend refused.
    fn relay_partner(&mut self, core: &mut RouterCore, partner: NodeRank, peers: &[NodeRank]) -> bool {
        if self.partner_fanout {
            return true;
        }
        let ledger = core.ledger();
        if !ledger.is_mutually_direct(partner) || !peers.iter().all(|p| ledger.is_mutually_direct(*p)) {
            return true;
        }
        let channels: Vec<_> = peers.iter().filter_map(|p| ledger.input_channel(*p)).collect();
        self.partner_fanout = true;
        info!(rank = core.rank(), partner, "[mesh] relaying outer partner into chassis");
        channels.into_iter().all(|channel| core.establish(partner, channel))
    }

    /// Rule 2.
    fn relay_inner_uplink(&mut self, core: &mut RouterCore, inners: &[NodeRank], uplink: ChannelIndex) -> bool {
        if self.inner_uplink || !inners.iter().all(|p| core.ledger().input_channel(*p).is_some()) {
            return true;
        }
        self.inner_uplink = true;
        info!(rank = core.rank(), channel = uplink, "[mesh] relaying inner nodes to outer partner");
        inners.iter().all(|inner| core.establish(*inner, uplink))
    }

    /// Rule 3.
    fn relay_cross_inner(
        &mut self,
        core: &mut RouterCore,
        partner: NodeRank,
        other_outer: NodeRank,
        inners: &[NodeRank],
        uplink: ChannelIndex,
    ) -> bool {
        if self.cross_relay {
            return true;
        }
        let me = core.rank();
        let candidates: Vec<_> = core
            .ledger()
            .sources_on(uplink)
            .into_iter()
            .filter(|rank| *rank != partner)
            .collect();
        let Some(candidate) = relay_candidate(me, other_outer, &candidates) else {
            return true;
        };
        let channels: Option<Vec<_>> = inners.iter().map(|p| core.ledger().input_channel(*p)).collect();
        let Some(channels) = channels else {
            return true;
        };
        self.cross_relay = true;
        info!(rank = me, candidate, other_outer, "[mesh] relaying partner-chassis inner node");
        channels.into_iter().all(|channel| core.establish(candidate, channel))
    }
}

impl ProfileRules for CubeRules {
    const KIND: ProfileKind = ProfileKind::Cube;

    fn expected_counters(topology: &EnsembleTopology) -> ExpectedCounters {
        ExpectedCounters::new(topology.expected_rx(), topology.base_expected_tx(), 0)
    }

    fn initialize(_core: &mut RouterCore) -> Result<Self, MeshError> {
        Ok(Self::default())
    }

    fn admit_channel(&self, core: &RouterCore, event: &ChannelEvent) -> Admission {
        if core.topology().same_chassis(core.rank(), event.peer) {
            return Admission::Accept;
        }
        match self.role.partner() {
            Some(partner) => Admission::Reject(format!("cross-chassis link to rank {} already held", partner)),
            None => Admission::Accept,
        }
    }

    fn on_channel_accepted(&mut self, core: &mut RouterCore, event: &ChannelEvent, outbox: &mut Outbox) {
        if core.topology().same_chassis(core.rank(), event.peer) {
            return;
        }
        if let Err(err) = self.role.assign_outer(event.peer) {
            warn!(rank = core.rank(), peer = event.peer, %err, "[mesh] outer role not reassigned");
            return;
        }
        let tx = core.raise_expected_tx(CUBE_OUTER_EXTRA_TX);
        info!(rank = core.rank(), partner = event.peer, expected_tx = tx, "[mesh] outer node discovered");
        for peer in core.direct_peers() {
            self.announce(core, peer, outbox);
        }
    }

    fn on_direct_transmit(&mut self, core: &mut RouterCore, receiver: NodeRank, outbox: &mut Outbox) {
        if self.role.is_outer() {
            self.announce(core, receiver, outbox);
        }
    }

    fn setup_forwards(&mut self, core: &mut RouterCore, _outbox: &mut Outbox) -> Result<(), MeshError> {
        let Some(partner) = self.role.partner() else {
            return Ok(());
        };
        let peers = core.topology().chassis_peers(core.rank());
        if !self.relay_partner(core, partner, &peers) {
            return Ok(());
        }
        let (Some(other_outer), Some(uplink)) = (self.other_outer(core), core.ledger().input_channel(partner))
        else {
            return Ok(());
        };
        let inners = inner_peers(&peers, other_outer);
        if !self.relay_inner_uplink(core, &inners, uplink) {
            return Ok(());
        }
        self.relay_cross_inner(core, partner, other_outer, &inners, uplink);
        Ok(())
    }

    fn on_outer_node_announce(
        &mut self,
        core: &mut RouterCore,
        node_id: NodeRank,
        chassis_id: &str,
        _outbox: &mut Outbox,
    ) -> Result<(), MeshError> {
        if node_id == core.rank() {
            return Err(core.violation("outer node announce names the local rank"));
        }
        match core.topology().chassis_of(node_id) {
            None => return Err(core.violation(format!("outer node announce from unknown rank {}", node_id))),
            Some(chassis) if chassis != chassis_id => {
                let detail = format!("rank {} announced chassis {} but belongs to {}", node_id, chassis_id, chassis);
                return Err(core.violation(detail));
            }
            Some(_) => {}
        }
        if self.known_outer.insert(node_id) {
            info!(rank = core.rank(), outer = node_id, chassis = chassis_id, "[mesh] outer node announced");
        } else {
            debug!(rank = core.rank(), outer = node_id, "[mesh] repeated outer node announce");
        }
        Ok(())
    }

    fn cross_chassis_partner(&self) -> Option<NodeRank> {
        self.role.partner()
    }
}
