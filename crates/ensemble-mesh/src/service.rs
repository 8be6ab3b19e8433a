//! # Ensemble Service
//!
//! Owns one router and the backend it talks to. Each `handle_*` call runs a
//! single router transition, then sends the control messages that transition
//! produced. Inbound control bytes are decoded here before they reach the
//! router.
//!
//! ## Failure policy
//!
//! - A message that cannot be encoded or handed to the transport fails the
//!   ensemble (`ControlMessageUndeliverable`); remaining messages of the same
//!   transition are dropped.
//! - Undecodable inbound bytes are returned as `MeshError::Codec` and do not
//!   touch router state.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::{ControlMessage, Outbox};
use crate::domain::{
    ChannelEvent, ConnectionEvent, EnsembleTopology, FailureReason, MeshError, NetworkConnectionEvent, NodeRank,
    RouterPhase,
};
use crate::ports::{EnsembleDelegate, EnsembleRouter, MeshBackend, RouterSnapshot};
use crate::router::build_router;

/// A router plus the transport for its outgoing messages.
pub struct EnsembleService {
    router: Box<dyn EnsembleRouter>,
    backend: Arc<dyn MeshBackend>,
}

impl EnsembleService {
    /// Build the router matching `topology` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Configuration` if the router cannot be built.
    pub fn new(
        topology: EnsembleTopology,
        backend: Arc<dyn MeshBackend>,
        delegate: Arc<dyn EnsembleDelegate>,
    ) -> Result<Self, MeshError> {
        let router = build_router(topology, backend.clone(), delegate)?;
        Ok(Self { router, backend })
    }

    /// The wrapped router.
    pub fn router(&self) -> &dyn EnsembleRouter {
        self.router.as_ref()
    }

    /// Local rank.
    pub fn rank(&self) -> NodeRank {
        self.router.rank()
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> RouterPhase {
        self.router.phase()
    }

    /// Not failed and nothing outstanding.
    pub fn is_ready(&self) -> bool {
        self.router.is_ready()
    }

    /// Full observable state.
    pub fn snapshot(&self) -> RouterSnapshot {
        self.router.snapshot()
    }

    /// Deliver a physical channel event.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Result<(), MeshError> {
        let outbox = self.router.on_channel_event(event)?;
        self.dispatch(outbox);
        Ok(())
    }

    /// Deliver an rx/tx connection event.
    pub fn handle_connection_event(&mut self, event: ConnectionEvent) -> Result<(), MeshError> {
        let outbox = self.router.on_connection_event(event)?;
        self.dispatch(outbox);
        Ok(())
    }

    /// Deliver a long-haul network link event.
    pub fn handle_network_event(&mut self, event: NetworkConnectionEvent) -> Result<(), MeshError> {
        let outbox = self.router.on_network_connection_event(event)?;
        self.dispatch(outbox);
        Ok(())
    }

    /// Deliver an already decoded control message.
    pub fn handle_control_message(&mut self, message: ControlMessage) -> Result<(), MeshError> {
        debug!(rank = self.rank(), kind = message.kind(), "[mesh] control message received");
        let outbox = match message {
            ControlMessage::Forward { forwarder, receiver } => self.router.on_forward_message(forwarder, receiver)?,
            ControlMessage::OuterNodeAnnounce { node_id, chassis_id } => {
                self.router.on_outer_node_announce(node_id, &chassis_id)?
            }
        };
        self.dispatch(outbox);
        Ok(())
    }

    /// Decode and deliver control bytes from the messaging transport.
    pub fn handle_control_bytes(&mut self, payload: &[u8]) -> Result<(), MeshError> {
        let message = ControlMessage::decode(payload).map_err(|err| {
            warn!(rank = self.rank(), %err, "[mesh] dropping undecodable control message");
            err
        })?;
        self.handle_control_message(message)
    }

    /// Fail the ensemble for an external reason (e.g. a watchdog timeout).
    pub fn report_failure(&mut self, reason: FailureReason) {
        self.router.report_failure(reason);
    }

    fn dispatch(&mut self, outbox: Outbox) {
        for outbound in outbox {
            let sent = outbound
                .message
                .encode()
                .map_err(|err| err.to_string())
                .and_then(|payload| {
                    self.backend
                        .send_control_message(outbound.to, &payload)
                        .map_err(|err| err.to_string())
                });
            match sent {
                Ok(()) => {
                    debug!(
                        rank = self.rank(),
                        to = outbound.to,
                        kind = outbound.message.kind(),
                        "[mesh] control message sent"
                    );
                }
                Err(detail) => {
                    self.router
                        .report_failure(FailureReason::ControlMessageUndeliverable { to: outbound.to, detail });
                    return;
                }
            }
        }
    }
}
