//! # Domain Errors
//!
//! Error taxonomy for mesh formation.
//!
//! - [`ConfigurationError`]: malformed ensemble membership, raised at
//!   construction only.
//! - [`MeshError::ProtocolViolation`]: an event broke the delivery ordering
//!   contract. Fatal for the router.
//! - Link failures never surface as `Err`; they move the router into its
//!   terminal failed state and are reported through the delegate with a
//!   [`FailureReason`].

use std::fmt;

use thiserror::Error;

use super::value_objects::{ChannelIndex, NodeRank};

/// Malformed ensemble membership or configuration input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Member count does not match any supported profile.
    #[error("Unsupported ensemble size: {0}")]
    UnsupportedSize(usize),

    /// The requested profile cannot be built from this member count.
    #[error("Profile {profile} cannot hold {count} members")]
    ProfileSizeMismatch {
        /// Requested profile
        profile: String,
        /// Member count supplied
        count: usize,
    },

    /// Two members share a rank.
    #[error("Duplicate rank: {0}")]
    DuplicateRank(NodeRank),

    /// Ranks must be exactly `0..n` so partitions line up with `rank / 8`.
    #[error("Ranks are not contiguous from zero (missing {0})")]
    NonContiguousRanks(NodeRank),

    /// A group of eight is not split into two chassis of four.
    #[error("Invalid chassis layout in group {group}: {detail}")]
    InvalidChassisLayout {
        /// Partition index (0 for the Cube profile)
        group: usize,
        /// What is wrong
        detail: String,
    },

    /// The local rank is not a declared member.
    #[error("Local rank {0} is not an ensemble member")]
    UnknownSelfRank(NodeRank),

    /// A cross-partition partner has no hostname for its network link.
    #[error("Partition partner {0} has no hostname")]
    MissingHostname(NodeRank),

    /// Unknown profile name in a config file.
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// Config file could not be read or parsed.
    #[error("Invalid configuration source: {0}")]
    Source(String),
}

/// Opaque failure reported by a backend or messaging collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {message}")]
pub struct BackendError {
    /// Backend operation that failed
    pub operation: &'static str,
    /// Collaborator-supplied detail
    pub message: String,
}

impl BackendError {
    /// Create a backend error for the named operation.
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Control-message codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not a recognised control message.
    #[error("Malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Payload is empty.
    #[error("Empty control message")]
    Empty,
}

/// Top-level error type returned by routers and the service.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Ensemble membership is unusable.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// An event arrived that the ordering contract rules out.
    #[error("Protocol violation on rank {rank}: {detail}")]
    ProtocolViolation {
        /// Local rank
        rank: NodeRank,
        /// What was violated
        detail: String,
    },

    /// The event does not apply to this topology profile.
    #[error("{event} is not supported by the {profile} profile")]
    Unsupported {
        /// Event name
        event: &'static str,
        /// Profile name
        profile: &'static str,
    },

    /// Inbound control bytes could not be decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A collaborator call failed outside a router transition.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The delivery queue for this router has shut down.
    #[error("Router task is no longer running")]
    RouterStopped,
}

impl MeshError {
    /// Shorthand for a protocol violation on `rank`.
    pub fn violation(rank: NodeRank, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            rank,
            detail: detail.into(),
        }
    }

    /// Check if this error is a protocol violation.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

/// Why the ensemble failed, as reported to the delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A discovered physical channel went away.
    ChannelLost {
        /// Local slot
        channel: ChannelIndex,
        /// Peer that was bound to it
        peer: NodeRank,
    },
    /// An rx/tx connection or network link reported `connected=false`.
    ConnectionLost {
        /// Peer named in the event
        peer: NodeRank,
    },
    /// A backend call returned an error.
    BackendFailure(BackendError),
    /// The ordering contract was broken.
    ProtocolViolation(String),
    /// An outgoing control message could not be handed to the transport.
    ControlMessageUndeliverable {
        /// Destination rank
        to: NodeRank,
        /// Transport detail
        detail: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelLost { channel, peer } => {
                write!(f, "channel {} to rank {} lost", channel, peer)
            }
            Self::ConnectionLost { peer } => write!(f, "connection for rank {} lost", peer),
            Self::BackendFailure(err) => write!(f, "backend failure: {}", err),
            Self::ProtocolViolation(detail) => write!(f, "protocol violation: {}", detail),
            Self::ControlMessageUndeliverable { to, detail } => {
                write!(f, "control message to rank {} undeliverable: {}", to, detail)
            }
        }
    }
}
