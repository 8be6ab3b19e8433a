//! # Ensemble Mesh
//!
//! Per-node topology formation and relay routing for fixed compute
//! ensembles of 2, 8, 16 or 32 nodes.
//!
//! Each node runs one router. The router consumes physical link events,
//! connection completions and control messages from its peers, asks the
//! backend to open transmit paths (directly or as a relay), and reports
//! readiness or failure to a delegate once every expected connection exists.
//!
//! ## Profiles
//!
//! - **Pair** - two directly linked nodes
//! - **Cube** - eight nodes in two chassis of four, bridged by two outer
//!   nodes per chassis
//! - **Hypercube** - one, two or four partitions of eight, with long-haul
//!   network links between partitions
//!
//! ## Architecture
//!
//! - **Domain Layer:** topology, connectivity ledger, roles, counters
//! - **Ports Layer:** `EnsembleRouter` (inbound), `MeshBackend` and
//!   `EnsembleDelegate` (outbound)
//! - **Router Layer:** shared skeleton plus per-profile forwarding rules
//! - **Service Layer:** decodes control bytes and dispatches each
//!   transition's outgoing messages
//! - **Adapters Layer:** TOML config and tokio delivery queue (feature-gated)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ensemble_mesh::testing::{RecordingBackend, RecordingDelegate};
//! use ensemble_mesh::{ChannelEvent, ConnectionEvent, EnsembleMember, EnsembleService, EnsembleTopology};
//!
//! let members = vec![EnsembleMember::new(0, "left"), EnsembleMember::new(1, "right")];
//! let topology = EnsembleTopology::new(members, 0).unwrap();
//! let delegate = Arc::new(RecordingDelegate::new());
//! let mut service = EnsembleService::new(topology, Arc::new(RecordingBackend::new()), delegate.clone()).unwrap();
//!
//! service.handle_channel_event(ChannelEvent::connected(5, 1, "right")).unwrap();
//! service.handle_connection_event(ConnectionEvent::rx(5, 1)).unwrap();
//! service.handle_connection_event(ConnectionEvent::tx(5, 0)).unwrap();
//!
//! assert!(service.is_ready());
//! assert_eq!(service.snapshot().routes[&1], "0->1");
//! assert_eq!(delegate.ready_count(), 1);
//! ```

#![warn(missing_docs)]

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod codec;
pub mod domain;
pub mod ports;
pub mod router;
pub mod service;

/// Recording doubles and the in-process fabric.
pub mod testing;

// =============================================================================
// FEATURE-GATED MODULES
// =============================================================================

/// Config loader and delivery queue.
pub mod adapters;

/// Subscriber setup.
#[cfg(feature = "telemetry")]
pub mod telemetry;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use codec::{ControlMessage, OutboundMessage, Outbox};
pub use domain::{
    BackendError, ChannelEvent, ChannelIndex, CodecError, ConfigurationError, ConnectionEvent, Direction,
    EnsembleMember, EnsembleTopology, ExpectedCounters, FailureReason, MeshError, NetworkConnectionEvent, NodeRank,
    ProfileKind, ProfileRequest, Route, RouteMap, RouterPhase, TransferEntry, TransferMap,
};
pub use ports::{EnsembleDelegate, EnsembleRouter, MeshBackend, RouterSnapshot};
pub use router::{build_router, CubeRouter, HypercubeRouter, PairRouter};
pub use service::EnsembleService;

#[cfg(feature = "config")]
pub use adapters::EnsembleConfig;

#[cfg(feature = "runtime")]
pub use adapters::{spawn_router, MeshEvent, RouterHandle};

#[cfg(feature = "telemetry")]
pub use telemetry::init_tracing;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
