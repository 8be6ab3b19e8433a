//! # Delivery Queue
//!
//! Routers are not internally synchronized. `spawn_router` moves an
//! [`EnsembleService`] onto its own tokio task and feeds it through an mpsc
//! queue, so link events, network events and control messages coming from
//! different sources are applied one at a time in arrival order.
//!
//! ```text
//!  link layer ─┐
//!  transport  ─┼─► RouterHandle ──mpsc──► task { service.handle_*() }
//!  watchdog   ─┘         ▲                         │
//!                        └──────── oneshot ────────┘
//! ```

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{ChannelEvent, ConnectionEvent, FailureReason, MeshError, NetworkConnectionEvent};
use crate::ports::RouterSnapshot;
use crate::service::EnsembleService;

/// Default queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Input accepted by a running router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeshEvent {
    /// Physical channel event.
    Channel(ChannelEvent),
    /// rx/tx completion.
    Connection(ConnectionEvent),
    /// Long-haul network link event.
    Network(NetworkConnectionEvent),
    /// Encoded control message from the transport.
    Control(Vec<u8>),
    /// External failure (e.g. watchdog timeout).
    Failure(FailureReason),
}

enum Command {
    Event(MeshEvent, oneshot::Sender<Result<(), MeshError>>),
    Snapshot(oneshot::Sender<RouterSnapshot>),
}

/// Cloneable handle to a router task. The task ends when every handle is
/// dropped.
#[derive(Clone, Debug)]
pub struct RouterHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event(event, _) => f.debug_tuple("Event").field(event).finish(),
            Self::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

impl RouterHandle {
    /// Apply one event and wait for the transition result.
    pub async fn submit(&self, event: MeshEvent) -> Result<(), MeshError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Event(event, reply))
            .await
            .map_err(|_| MeshError::RouterStopped)?;
        result.await.map_err(|_| MeshError::RouterStopped)?
    }

    /// Current observable state.
    pub async fn snapshot(&self) -> Result<RouterSnapshot, MeshError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(reply))
            .await
            .map_err(|_| MeshError::RouterStopped)?;
        result.await.map_err(|_| MeshError::RouterStopped)
    }

    /// Check if the router task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Run `service` on a dedicated task with the default queue depth.
///
/// Must be called from within a tokio runtime. The join handle yields the
/// service back once every [`RouterHandle`] is dropped.
pub fn spawn_router(service: EnsembleService) -> (RouterHandle, JoinHandle<EnsembleService>) {
    spawn_router_with_capacity(service, DEFAULT_QUEUE_CAPACITY)
}

/// Run `service` on a dedicated task with a bounded queue of `capacity`.
pub fn spawn_router_with_capacity(
    mut service: EnsembleService,
    capacity: usize,
) -> (RouterHandle, JoinHandle<EnsembleService>) {
    let (commands, mut queue) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(async move {
        info!(rank = service.rank(), "[mesh] router task started");
        while let Some(command) = queue.recv().await {
            match command {
                Command::Event(event, reply) => {
                    let result = apply(&mut service, event);
                    if reply.send(result).is_err() {
                        debug!(rank = service.rank(), "[mesh] submitter went away before the reply");
                    }
                }
                Command::Snapshot(reply) => {
                    if reply.send(service.snapshot()).is_err() {
                        debug!(rank = service.rank(), "[mesh] snapshot requester went away before the reply");
                    }
                }
            }
        }
        info!(rank = service.rank(), phase = ?service.phase(), "[mesh] router task stopped");
        service
    });
    (RouterHandle { commands }, task)
}

fn apply(service: &mut EnsembleService, event: MeshEvent) -> Result<(), MeshError> {
    match event {
        MeshEvent::Channel(e) => service.handle_channel_event(e),
        MeshEvent::Connection(e) => service.handle_connection_event(e),
        MeshEvent::Network(e) => service.handle_network_event(e),
        MeshEvent::Control(payload) => service.handle_control_bytes(&payload),
        MeshEvent::Failure(reason) => {
            service.report_failure(reason);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{EnsembleMember, EnsembleTopology, RouterPhase};
    use crate::testing::{RecordingBackend, RecordingDelegate};

    fn pair_service(delegate: Arc<RecordingDelegate>) -> EnsembleService {
        let members = vec![EnsembleMember::new(0, "A"), EnsembleMember::new(1, "B")];
        let topology = EnsembleTopology::new(members, 0).unwrap();
        EnsembleService::new(topology, Arc::new(RecordingBackend::new()), delegate).unwrap()
    }

    #[tokio::test]
    async fn test_events_applied_in_order() {
        let delegate = Arc::new(RecordingDelegate::new());
        let (handle, task) = spawn_router(pair_service(delegate.clone()));

        handle.submit(MeshEvent::Channel(ChannelEvent::connected(5, 1, "B"))).await.unwrap();
        handle.submit(MeshEvent::Connection(ConnectionEvent::rx(5, 1))).await.unwrap();
        handle.submit(MeshEvent::Connection(ConnectionEvent::tx(5, 0))).await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, RouterPhase::Ready);
        assert_eq!(snapshot.routes[&1], "0->1");
        assert_eq!(delegate.ready_count(), 1);

        drop(handle);
        let service = task.await.unwrap();
        assert!(service.is_ready());
    }

    #[tokio::test]
    async fn test_errors_are_returned_to_submitter() {
        let (handle, _task) = spawn_router(pair_service(Arc::new(RecordingDelegate::new())));
        let err = handle
            .submit(MeshEvent::Connection(ConnectionEvent::rx(5, 1)))
            .await
            .unwrap_err();
        assert!(err.is_protocol_violation());
        let err = handle.submit(MeshEvent::Control(Vec::new())).await.unwrap_err();
        assert!(matches!(err, MeshError::Codec(_)));
    }

    #[tokio::test]
    async fn test_concurrent_submitters_serialized() {
        let delegate = Arc::new(RecordingDelegate::new());
        let (handle, _task) = spawn_router(pair_service(delegate.clone()));
        handle.submit(MeshEvent::Channel(ChannelEvent::connected(5, 1, "B"))).await.unwrap();

        let rx = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(MeshEvent::Connection(ConnectionEvent::rx(5, 1))).await })
        };
        let tx = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(MeshEvent::Connection(ConnectionEvent::tx(5, 0))).await })
        };
        rx.await.unwrap().unwrap();
        tx.await.unwrap().unwrap();
        assert_eq!(delegate.ready_count(), 1);
    }

    #[tokio::test]
    async fn test_external_failure() {
        let delegate = Arc::new(RecordingDelegate::new());
        let (handle, _task) = spawn_router(pair_service(delegate.clone()));
        let reason = FailureReason::ProtocolViolation("watchdog expired".to_string());
        handle.submit(MeshEvent::Failure(reason.clone())).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().phase, RouterPhase::Failed);
        assert_eq!(delegate.failures(), vec![reason]);
    }

    #[tokio::test]
    async fn test_abandoned_snapshot_keeps_task_running() {
        let delegate = Arc::new(RecordingDelegate::new());
        let (handle, _task) = spawn_router(pair_service(delegate.clone()));
        let (reply, result) = oneshot::channel();
        drop(result);
        handle.commands.send(Command::Snapshot(reply)).await.unwrap();

        handle.submit(MeshEvent::Channel(ChannelEvent::connected(5, 1, "B"))).await.unwrap();
        assert!(!handle.is_closed());
        assert_eq!(handle.snapshot().await.unwrap().phase, RouterPhase::Forming);
    }

    #[tokio::test]
    async fn test_stopped_task_reports_router_stopped() {
        let (handle, task) = spawn_router(pair_service(Arc::new(RecordingDelegate::new())));
        task.abort();
        let _ = task.await;
        let err = handle.snapshot().await.unwrap_err();
        assert!(matches!(err, MeshError::RouterStopped));
    }
}
