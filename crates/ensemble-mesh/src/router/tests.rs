//! Shared-skeleton tests, run against the Pair and Cube routers.

use std::sync::Arc;

use super::*;
use crate::domain::{invariant_lock_after_mesh, invariant_ready_iff_complete, EnsembleMember};
use crate::testing::{ensemble_members, BackendCall, RecordingBackend, RecordingDelegate};

fn pair(self_rank: NodeRank) -> (PairRouter, Arc<RecordingBackend>, Arc<RecordingDelegate>) {
    let members = vec![EnsembleMember::new(0, "A"), EnsembleMember::new(1, "B")];
    let topology = EnsembleTopology::new(members, self_rank).unwrap();
    let backend = Arc::new(RecordingBackend::new());
    let delegate = Arc::new(RecordingDelegate::new());
    let router = PairRouter::new(topology, backend.clone(), delegate.clone()).unwrap();
    (router, backend, delegate)
}

fn cube(self_rank: NodeRank) -> (CubeRouter, Arc<RecordingBackend>, Arc<RecordingDelegate>) {
    let topology = EnsembleTopology::new(ensemble_members(8), self_rank).unwrap();
    let backend = Arc::new(RecordingBackend::new());
    let delegate = Arc::new(RecordingDelegate::new());
    let router = CubeRouter::new(topology, backend.clone(), delegate.clone()).unwrap();
    (router, backend, delegate)
}

fn ready_pair() -> (PairRouter, Arc<RecordingBackend>, Arc<RecordingDelegate>) {
    let (mut router, backend, delegate) = pair(0);
    router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap();
    router.on_connection_event(ConnectionEvent::rx(5, 1)).unwrap();
    router.on_connection_event(ConnectionEvent::tx(5, 0)).unwrap();
    (router, backend, delegate)
}

// =============================================================================
// FAILURE TRANSITIONS
// =============================================================================

#[test]
fn test_channel_loss_fails_once() {
    let (mut router, _, delegate) = pair(0);
    router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap();
    router.on_channel_event(ChannelEvent::disconnected(5, 1, "B")).unwrap();
    assert_eq!(router.phase(), RouterPhase::Failed);
    assert_eq!(delegate.failures(), vec![FailureReason::ChannelLost { channel: 5, peer: 1 }]);

    router.on_channel_event(ChannelEvent::disconnected(5, 1, "B")).unwrap();
    router.on_connection_event(ConnectionEvent::rx(5, 1)).unwrap();
    router.on_connection_event(ConnectionEvent::tx(5, 0)).unwrap();
    assert_eq!(router.phase(), RouterPhase::Failed);
    assert!(!router.is_ready());
    assert_eq!(delegate.failed_count(), 1);
    assert_eq!(delegate.ready_count(), 0);
}

#[test]
fn test_unbound_channel_loss_ignored() {
    let (mut router, _, delegate) = pair(0);
    router.on_channel_event(ChannelEvent::disconnected(3, 1, "B")).unwrap();
    assert_eq!(router.phase(), RouterPhase::Forming);
    assert_eq!(delegate.failed_count(), 0);
}

#[test]
fn test_ready_then_loss_fails() {
    let (mut router, _, delegate) = ready_pair();
    assert_eq!(router.phase(), RouterPhase::Ready);
    router.on_channel_event(ChannelEvent::disconnected(5, 1, "B")).unwrap();
    assert_eq!(router.phase(), RouterPhase::Failed);
    assert_eq!(delegate.ready_count(), 1);
    assert_eq!(delegate.failed_count(), 1);
}

#[test]
fn test_connection_drop_fails() {
    let (mut router, _, delegate) = pair(0);
    router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap();
    router.on_connection_event(ConnectionEvent::rx(5, 1).dropped()).unwrap();
    assert_eq!(delegate.failures(), vec![FailureReason::ConnectionLost { peer: 1 }]);
}

#[test]
fn test_establish_failure_fails() {
    let (mut router, backend, delegate) = pair(0);
    backend.fail_on("establish_transmit");
    router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap();
    assert_eq!(router.phase(), RouterPhase::Failed);
    assert!(matches!(delegate.failures()[0], FailureReason::BackendFailure(_)));
}

#[test]
fn test_lock_failure_fails() {
    let (mut router, backend, delegate) = pair(0);
    backend.fail_on("lock");
    router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap();
    router.on_connection_event(ConnectionEvent::rx(5, 1)).unwrap();
    router.on_connection_event(ConnectionEvent::tx(5, 0)).unwrap();
    assert_eq!(router.phase(), RouterPhase::Failed);
    assert_eq!(delegate.ready_count(), 0);
    assert!(!router.snapshot().locked);
}

#[test]
fn test_report_failure_notifies_once() {
    let (mut router, _, delegate) = pair(1);
    let reason = FailureReason::ControlMessageUndeliverable {
        to: 0,
        detail: "queue closed".to_string(),
    };
    router.report_failure(reason.clone());
    router.report_failure(reason.clone());
    assert_eq!(delegate.failures(), vec![reason]);
}

// =============================================================================
// CHANNEL SCREENING
// =============================================================================

#[test]
fn test_duplicate_channel_event_ignored() {
    let (mut router, backend, _) = pair(0);
    router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap();
    router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap();
    assert_eq!(backend.calls(), vec![BackendCall::EstablishTransmit { source: 0, channel: 5 }]);
}

#[test]
fn test_unknown_peer_rejected() {
    let (mut router, backend, delegate) = pair(0);
    router.on_channel_event(ChannelEvent::connected(5, 9, "B")).unwrap();
    router.on_channel_event(ChannelEvent::connected(6, 0, "A")).unwrap();
    assert_eq!(
        backend.calls(),
        vec![
            BackendCall::DisableChannel { channel: 5 },
            BackendCall::DisableChannel { channel: 6 }
        ]
    );
    assert_eq!(delegate.failed_count(), 0);
    assert!(router.transfer_map().is_empty());
}

#[test]
fn test_rebinding_rejected() {
    let (mut router, backend, _) = cube(2);
    router.on_channel_event(ChannelEvent::connected(1, 0, "p0-a")).unwrap();
    router.on_channel_event(ChannelEvent::connected(1, 3, "p0-a")).unwrap();
    router.on_channel_event(ChannelEvent::connected(4, 0, "p0-a")).unwrap();
    assert_eq!(
        backend.calls(),
        vec![
            BackendCall::EstablishTransmit { source: 2, channel: 1 },
            BackendCall::DisableChannel { channel: 1 },
            BackendCall::DisableChannel { channel: 4 },
        ]
    );
}

#[test]
fn test_lost_channel_cannot_be_reused() {
    let (mut router, backend, _) = cube(2);
    router.on_channel_event(ChannelEvent::connected(1, 0, "p0-a")).unwrap();
    router.on_channel_event(ChannelEvent::disconnected(1, 0, "p0-a")).unwrap();
    assert_eq!(router.phase(), RouterPhase::Failed);
    router.on_channel_event(ChannelEvent::connected(1, 0, "p0-a")).unwrap();
    assert_eq!(backend.calls().len(), 1);
}

#[test]
fn test_disable_failure_fails() {
    let (mut router, backend, delegate) = pair(0);
    backend.fail_on("disable_channel");
    router.on_channel_event(ChannelEvent::connected(5, 1, "A")).unwrap();
    assert_eq!(router.phase(), RouterPhase::Failed);
    assert_eq!(delegate.failed_count(), 1);
}

// =============================================================================
// PROTOCOL VIOLATIONS
// =============================================================================

#[test]
fn test_rx_before_discovery_is_violation() {
    let (mut router, _, delegate) = pair(0);
    let err = router.on_connection_event(ConnectionEvent::rx(5, 1)).unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(router.phase(), RouterPhase::Failed);
    assert_eq!(delegate.failed_count(), 1);
}

#[test]
fn test_second_rx_for_same_source_is_violation() {
    let (mut router, _, _) = cube(2);
    router.on_channel_event(ChannelEvent::connected(1, 0, "p0-a")).unwrap();
    router.on_channel_event(ChannelEvent::connected(3, 3, "p0-a")).unwrap();
    router.on_connection_event(ConnectionEvent::rx(1, 0)).unwrap();
    let err = router.on_connection_event(ConnectionEvent::rx(3, 0)).unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn test_extra_completion_is_violation() {
    let (mut router, _, _) = pair(0);
    router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap();
    router.on_connection_event(ConnectionEvent::tx(5, 0)).unwrap();
    let err = router.on_connection_event(ConnectionEvent::tx(5, 0)).unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn test_forward_before_route_is_violation() {
    let (mut router, _, delegate) = cube(2);
    let err = router.on_forward_message(0, 4).unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(delegate.failed_count(), 1);
}

#[test]
fn test_forward_to_self_is_violation() {
    let (mut router, _, _) = cube(2);
    router.on_channel_event(ChannelEvent::connected(1, 0, "p0-a")).unwrap();
    router.on_connection_event(ConnectionEvent::tx(1, 2)).unwrap();
    assert!(router.on_forward_message(0, 2).unwrap_err().is_protocol_violation());
}

#[test]
fn test_events_after_failure_are_noops() {
    let (mut router, backend, _) = pair(0);
    router.report_failure(FailureReason::ProtocolViolation("test".to_string()));
    assert!(router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap().is_empty());
    assert!(router.on_forward_message(1, 0).unwrap().is_empty());
    assert!(router.on_outer_node_announce(1, "B").unwrap().is_empty());
    assert!(backend.calls().is_empty());
}

// =============================================================================
// ROUTES AND READINESS
// =============================================================================

#[test]
fn test_route_composition() {
    let (mut router, _, _) = cube(2);
    router.on_channel_event(ChannelEvent::connected(1, 0, "p0-a")).unwrap();
    router.on_connection_event(ConnectionEvent::tx(1, 2)).unwrap();
    assert_eq!(router.routes()[&0], "2->0");

    router.on_forward_message(0, 4).unwrap();
    assert_eq!(router.routes()[&4], "2->0->4");
}

#[test]
fn test_first_route_wins() {
    let (mut router, _, _) = cube(2);
    router.on_channel_event(ChannelEvent::connected(1, 0, "p0-a")).unwrap();
    router.on_channel_event(ChannelEvent::connected(2, 1, "p0-a")).unwrap();
    router.on_connection_event(ConnectionEvent::tx(1, 2)).unwrap();
    router.on_connection_event(ConnectionEvent::tx(2, 2)).unwrap();
    router.on_forward_message(1, 5).unwrap();
    router.on_forward_message(0, 5).unwrap();
    assert_eq!(router.routes()[&5], "2->1->5");
}

#[test]
fn test_transfer_map_records_channels() {
    let (router, _, _) = ready_pair();
    let map = router.transfer_map();
    assert_eq!(map[&1].input_channel, Some(5));
    assert_eq!(map[&1].output_channels, vec![5]);
}

#[test]
fn test_ready_iff_counters_zero() {
    let (mut router, _, _) = pair(0);
    let steps = [
        ConnectionEvent::rx(5, 1),
        ConnectionEvent::tx(5, 0),
    ];
    router.on_channel_event(ChannelEvent::connected(5, 1, "B")).unwrap();
    for step in steps {
        router.on_connection_event(step).unwrap();
        assert!(invariant_ready_iff_complete(router.core().state()));
        assert!(invariant_lock_after_mesh(router.core().state()));
    }
    assert!(router.is_ready());
}

#[test]
fn test_build_router_picks_profile() {
    let backend = Arc::new(RecordingBackend::new());
    let delegate = Arc::new(RecordingDelegate::new());
    let topology = EnsembleTopology::new(ensemble_members(16), 3).unwrap();
    let router = build_router(topology, backend, delegate.clone()).unwrap();
    assert_eq!(router.profile(), ProfileKind::Hypercube);
    assert_eq!(router.rank(), 3);
    assert_eq!(delegate.hostnames(), vec![("node11".to_string(), 11)]);
}
