//! # Driven Ports (Outbound SPI)
//!
//! Interfaces the host must implement: the physical-link backend and the
//! ensemble-result delegate.
//!
//! Backend calls are synchronous and checked. A returned error fails the
//! ensemble immediately; retries and timeouts belong to the implementation.

use crate::domain::{BackendError, ChannelIndex, FailureReason, NodeRank};

/// Connection-establishment backend and messaging transport.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a router only calls them from its
/// own serialized context, but the same backend is usually shared with the
/// component that raises link events.
pub trait MeshBackend: Send + Sync {
    /// Start transmitting `source`'s data on local `channel`.
    ///
    /// `source` is the local rank for direct links and another rank when this
    /// node relays.
    fn establish_transmit(&self, source: NodeRank, channel: ChannelIndex) -> Result<(), BackendError>;

    /// Stop using a channel whose peer was rejected.
    fn disable_channel(&self, channel: ChannelIndex) -> Result<(), BackendError>;

    /// Freeze the mesh configuration once every local connection exists.
    fn lock(&self) -> Result<(), BackendError>;

    /// Hand an encoded control message to the messaging transport.
    fn send_control_message(&self, to: NodeRank, payload: &[u8]) -> Result<(), BackendError>;
}

/// Receiver of ensemble-level outcomes.
pub trait EnsembleDelegate: Send + Sync {
    /// Every expected connection exists and the backend is locked.
    fn ensemble_ready(&self);

    /// The ensemble failed. Called at most once per router.
    fn ensemble_failed(&self, reason: &FailureReason);

    /// Open a long-haul network link to a partition partner.
    ///
    /// Called once per cross-partition partner while the Hypercube router is
    /// constructed.
    fn add_peer_hostname(&self, hostname: &str, rank: NodeRank);
}
