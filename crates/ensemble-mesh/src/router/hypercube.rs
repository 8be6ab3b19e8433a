//! # Hypercube Profile
//!
//! One, two or four partitions of eight. Inside a partition every node has
//! exactly one cross-chassis partner and relays it to its three chassis
//! peers; between partitions, nodes with the same `rank % 8` talk over a
//! long-haul network link opened by the delegate.
//!
//! The backend is locked as soon as the local mesh is complete. Readiness
//! additionally waits for every network link.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::{Admission, ProfileRules, RouterCore};
use crate::codec::Outbox;
use crate::domain::{
    ChannelEvent, ConfigurationError, EnsembleTopology, ExpectedCounters, FailureReason, MeshError,
    NetworkConnectionEvent, NodeRank, OnceSlot, ProfileKind,
};

/// Rules and runtime state of a Hypercube node.
#[derive(Debug, Default)]
pub struct HypercubeRules {
    partner: OnceSlot<NodeRank>,
    network_partners: BTreeSet<NodeRank>,
    network_up: BTreeSet<NodeRank>,
    partner_fanout: bool,
}

impl HypercubeRules {
    /// Cross-chassis partner inside the partition.
    pub fn partner(&self) -> Option<NodeRank> {
        self.partner.get()
    }

    /// Partners in other partitions.
    pub fn network_partners(&self) -> &BTreeSet<NodeRank> {
        &self.network_partners
    }
}

impl ProfileRules for HypercubeRules {
    const KIND: ProfileKind = ProfileKind::Hypercube;

    fn expected_counters(topology: &EnsembleTopology) -> ExpectedCounters {
        ExpectedCounters::new(
            topology.expected_rx(),
            topology.base_expected_tx(),
            topology.expected_network(),
        )
    }

    fn initialize(core: &mut RouterCore) -> Result<Self, MeshError> {
        let topology = core.topology();
        let mut hostnames = Vec::new();
        for rank in topology.partition_partners(core.rank()) {
            let hostname = topology
                .member(rank)
                .and_then(|m| m.hostname.clone())
                .ok_or(ConfigurationError::MissingHostname(rank))?;
            hostnames.push((rank, hostname));
        }

        let mut rules = Self::default();
        for (rank, hostname) in hostnames {
            debug!(rank = core.rank(), peer = rank, %hostname, "[mesh] requesting network link");
            core.delegate().add_peer_hostname(&hostname, rank);
            rules.network_partners.insert(rank);
        }
        Ok(rules)
    }

    fn admit_channel(&self, core: &RouterCore, event: &ChannelEvent) -> Admission {
        if core.topology().same_chassis(core.rank(), event.peer) {
            return Admission::Accept;
        }
        match self.partner.get() {
            Some(partner) => Admission::Reject(format!("cross-chassis partner {} already bound", partner)),
            None => Admission::Accept,
        }
    }

    fn on_channel_accepted(&mut self, core: &mut RouterCore, event: &ChannelEvent, _outbox: &mut Outbox) {
        if core.topology().same_chassis(core.rank(), event.peer) {
            return;
        }
        if self.partner.set(event.peer).is_ok() {
            info!(rank = core.rank(), partner = event.peer, "[mesh] cross-chassis partner discovered");
        }
    }

    fn setup_forwards(&mut self, core: &mut RouterCore, _outbox: &mut Outbox) -> Result<(), MeshError> {
        let Some(partner) = self.partner.get() else {
            return Ok(());
        };
        if self.partner_fanout {
            return Ok(());
        }
        let peers = core.topology().chassis_peers(core.rank());
        let ledger = core.ledger();
        if !ledger.is_mutually_direct(partner) || !peers.iter().all(|p| ledger.is_mutually_direct(*p)) {
            return Ok(());
        }
        let channels: Vec<_> = peers.iter().filter_map(|p| ledger.input_channel(*p)).collect();
        self.partner_fanout = true;
        info!(rank = core.rank(), partner, "[mesh] relaying partner into chassis");
        for channel in channels {
            if !core.establish(partner, channel) {
                break;
            }
        }
        Ok(())
    }

    fn on_network_connection(&mut self, core: &mut RouterCore, event: &NetworkConnectionEvent) -> Result<(), MeshError> {
        if !self.network_partners.contains(&event.peer) {
            return Err(core.violation(format!("network link to rank {} was never requested", event.peer)));
        }
        if !event.connected {
            core.fail(FailureReason::ConnectionLost { peer: event.peer });
            return Ok(());
        }
        if !self.network_up.insert(event.peer) {
            debug!(rank = core.rank(), peer = event.peer, "[mesh] duplicate network link ignored");
            return Ok(());
        }
        let remaining = core.complete_network()?;
        info!(rank = core.rank(), peer = event.peer, remaining, "[mesh] network link up");
        core.signal_if_ready();
        Ok(())
    }

    fn cross_chassis_partner(&self) -> Option<NodeRank> {
        self.partner.get()
    }

    fn network_peers(&self) -> Vec<NodeRank> {
        self.network_up.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{ConnectionEvent, RouterPhase};
    use crate::ports::EnsembleRouter;
    use crate::router::HypercubeRouter;
    use crate::testing::{ensemble_members, BackendCall, RecordingBackend, RecordingDelegate};

    fn router(count: u32, self_rank: NodeRank) -> (HypercubeRouter, Arc<RecordingBackend>, Arc<RecordingDelegate>) {
        let topology = EnsembleTopology::new(ensemble_members(count), self_rank).unwrap();
        let backend = Arc::new(RecordingBackend::new());
        let delegate = Arc::new(RecordingDelegate::new());
        let router = HypercubeRouter::new(topology, backend.clone(), delegate.clone()).unwrap();
        (router, backend, delegate)
    }

    /// Drive rank 0 of partition 0 until its local mesh is complete.
    ///
    /// Chassis peers 1, 2, 3 sit on channels 1, 2, 3; partner 4 on channel 4.
    /// Ranks 5, 6, 7 arrive relayed through their partners 1, 2, 3.
    fn complete_mesh(router: &mut HypercubeRouter) {
        for peer in 1..=3 {
            router.on_channel_event(ChannelEvent::connected(peer, peer, "p0-a")).unwrap();
        }
        router.on_channel_event(ChannelEvent::connected(4, 4, "p0-b")).unwrap();
        for peer in 1..=4 {
            router.on_connection_event(ConnectionEvent::rx(peer, peer)).unwrap();
            router.on_connection_event(ConnectionEvent::tx(peer, 0)).unwrap();
        }
        for channel in 1..=3 {
            router.on_connection_event(ConnectionEvent::tx(channel, 4)).unwrap();
            router.on_connection_event(ConnectionEvent::rx(channel, channel + 4)).unwrap();
        }
    }

    #[test]
    fn test_counters_fixed_at_construction() {
        let (router, _, delegate) = router(16, 0);
        assert_eq!(router.expected(), ExpectedCounters::new(7, 7, 1));
        assert_eq!(delegate.hostnames(), vec![("node8".to_string(), 8)]);
    }

    #[test]
    fn test_thirty_two_nodes_request_three_links() {
        let (router, _, delegate) = router(32, 13);
        assert_eq!(router.expected().network, 3);
        let ranks: Vec<NodeRank> = delegate.hostnames().into_iter().map(|(_, rank)| rank).collect();
        assert_eq!(ranks, vec![5, 21, 29]);
    }

    #[test]
    fn test_missing_hostname_rejected() {
        let mut members = ensemble_members(16);
        members[8].hostname = None;
        let topology = EnsembleTopology::new(members, 0).unwrap();
        let delegate = Arc::new(RecordingDelegate::new());
        let result = HypercubeRouter::new(topology, Arc::new(RecordingBackend::new()), delegate.clone());
        assert!(matches!(
            result,
            Err(MeshError::Configuration(ConfigurationError::MissingHostname(8)))
        ));
        assert!(delegate.hostnames().is_empty());
    }

    #[test]
    fn test_partner_fanout_once() {
        let (mut router, backend, _) = router(16, 0);
        complete_mesh(&mut router);
        let relayed: Vec<_> = backend
            .calls()
            .into_iter()
            .filter(|call| matches!(call, BackendCall::EstablishTransmit { source: 4, .. }))
            .collect();
        assert_eq!(relayed.len(), 3);
        assert_eq!(router.rules().partner(), Some(4));
    }

    #[test]
    fn test_network_gates_readiness() {
        let (mut router, backend, delegate) = router(16, 0);
        complete_mesh(&mut router);
        assert!(router.expected().mesh_complete());
        assert_eq!(backend.lock_count(), 1);
        assert_eq!(delegate.ready_count(), 0);
        assert!(!router.is_ready());

        router.on_network_connection_event(NetworkConnectionEvent::connected(8)).unwrap();
        assert!(router.is_ready());
        assert_eq!(router.phase(), RouterPhase::Ready);
        assert_eq!(delegate.ready_count(), 1);

        router.on_network_connection_event(NetworkConnectionEvent::connected(8)).unwrap();
        assert_eq!(delegate.ready_count(), 1);
        assert_eq!(backend.lock_count(), 1);
        assert_eq!(router.snapshot().network_peers, vec![8]);
    }

    #[test]
    fn test_network_before_mesh_does_not_signal() {
        let (mut router, backend, delegate) = router(16, 0);
        router.on_network_connection_event(NetworkConnectionEvent::connected(8)).unwrap();
        assert_eq!(router.expected().network, 0);
        assert_eq!(delegate.ready_count(), 0);
        complete_mesh(&mut router);
        assert_eq!(backend.lock_count(), 1);
        assert_eq!(delegate.ready_count(), 1);
    }

    #[test]
    fn test_network_from_stranger_is_violation() {
        let (mut router, _, delegate) = router(16, 0);
        let err = router
            .on_network_connection_event(NetworkConnectionEvent::connected(9))
            .unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(delegate.failed_count(), 1);
    }

    #[test]
    fn test_network_loss_fails() {
        let (mut router, _, delegate) = router(16, 0);
        router.on_network_connection_event(NetworkConnectionEvent::connected(8)).unwrap();
        router.on_network_connection_event(NetworkConnectionEvent::disconnected(8)).unwrap();
        assert_eq!(router.phase(), RouterPhase::Failed);
        assert_eq!(delegate.failures(), vec![FailureReason::ConnectionLost { peer: 8 }]);
    }

    #[test]
    fn test_channel_to_other_partition_rejected() {
        let (mut router, backend, _) = router(16, 0);
        router.on_channel_event(ChannelEvent::connected(6, 9, "p1-a")).unwrap();
        assert_eq!(backend.calls(), vec![BackendCall::DisableChannel { channel: 6 }]);
    }

    #[test]
    fn test_second_partner_rejected() {
        let (mut router, backend, _) = router(16, 0);
        router.on_channel_event(ChannelEvent::connected(4, 4, "p0-b")).unwrap();
        router.on_channel_event(ChannelEvent::connected(5, 5, "p0-b")).unwrap();
        assert!(backend.calls().contains(&BackendCall::DisableChannel { channel: 5 }));
        assert_eq!(router.snapshot().cross_chassis_partner, Some(4));
    }

    #[test]
    fn test_single_partition_needs_no_network() {
        let request = crate::domain::ProfileRequest::Exact(ProfileKind::Hypercube);
        let topology = EnsembleTopology::with_profile(ensemble_members(8), 0, request).unwrap();
        let delegate = Arc::new(RecordingDelegate::new());
        let mut router = HypercubeRouter::new(topology, Arc::new(RecordingBackend::new()), delegate.clone()).unwrap();
        complete_mesh(&mut router);
        assert!(router.is_ready());
        assert_eq!(delegate.ready_count(), 1);
        assert!(delegate.hostnames().is_empty());
    }
}
