//! # Control-Message Codec
//!
//! The two messages routers exchange over the external messaging transport.
//! Payloads are JSON objects tagged by `type`:
//!
//! ```json
//! {"type":"Forward","forwarder":4,"receiver":2}
//! {"type":"OuterNodeAnnounce","nodeID":0,"chassisID":"chassis-a"}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::{CodecError, NodeRank};

/// Inter-node control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// `forwarder` now relays the recipient's data to `receiver`.
    Forward {
        /// Relaying node
        forwarder: NodeRank,
        /// Node the data is relayed to
        receiver: NodeRank,
    },
    /// `node_id` holds a cross-chassis link.
    OuterNodeAnnounce {
        /// Announcing outer node
        #[serde(rename = "nodeID")]
        node_id: NodeRank,
        /// Its chassis
        #[serde(rename = "chassisID")]
        chassis_id: String,
    },
}

impl ControlMessage {
    /// Short message name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Forward { .. } => "Forward",
            Self::OuterNodeAnnounce { .. } => "OuterNodeAnnounce",
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A control message a router wants sent once its transition is finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination rank.
    pub to: NodeRank,
    /// Message body.
    pub message: ControlMessage,
}

impl OutboundMessage {
    /// Address `message` to `to`.
    pub fn new(to: NodeRank, message: ControlMessage) -> Self {
        Self { to, message }
    }
}

/// Messages produced by one router transition, in emission order.
pub type Outbox = Vec<OutboundMessage>;
