//! # Ports Layer
//!
//! - `inbound`: the router API driven by link events and control messages
//! - `outbound`: backend and delegate traits the host implements

pub mod inbound;
pub mod outbound;

pub use inbound::{EnsembleRouter, RouterSnapshot};
pub use outbound::{EnsembleDelegate, MeshBackend};
