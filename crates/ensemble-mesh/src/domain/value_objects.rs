//! # Domain Value Objects
//!
//! Ranks, channels, events and routes exchanged between the routers and their
//! collaborators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rank of an ensemble member. Unique and stable for the ensemble lifetime.
pub type NodeRank = u32;

/// Local physical channel slot.
pub type ChannelIndex = u32;

/// Static description of one ensemble member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleMember {
    /// Member rank.
    pub rank: NodeRank,
    /// Chassis the member sits in.
    pub chassis_id: String,
    /// Hostname used to open long-haul network links.
    #[serde(default)]
    pub hostname: Option<String>,
}

impl EnsembleMember {
    /// Create a member without a hostname.
    pub fn new(rank: NodeRank, chassis_id: impl Into<String>) -> Self {
        Self {
            rank,
            chassis_id: chassis_id.into(),
            hostname: None,
        }
    }

    /// Attach a hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

/// A physical link slot observed (or lost) a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEvent {
    /// Local slot.
    pub channel: ChannelIndex,
    /// Peer identity confirmed over the slot.
    pub peer: NodeRank,
    /// Chassis the peer reports.
    pub peer_chassis: String,
    /// `false` when the peer went away.
    pub connected: bool,
}

impl ChannelEvent {
    /// A peer was observed on `channel`.
    pub fn connected(channel: ChannelIndex, peer: NodeRank, peer_chassis: impl Into<String>) -> Self {
        Self {
            channel,
            peer,
            peer_chassis: peer_chassis.into(),
            connected: true,
        }
    }

    /// The peer on `channel` went away.
    pub fn disconnected(channel: ChannelIndex, peer: NodeRank, peer_chassis: impl Into<String>) -> Self {
        Self {
            connected: false,
            ..Self::connected(channel, peer, peer_chassis)
        }
    }
}

/// Direction of a completed backend connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// This node receives `peer`'s data on the channel.
    Rx,
    /// This node transmits `peer`'s data on the channel.
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rx => write!(f, "rx"),
            Self::Tx => write!(f, "tx"),
        }
    }
}

/// The backend finished (or lost) a directed connection.
///
/// For `Rx`, `peer` is the rank whose data now arrives on `channel`.
/// For `Tx`, `peer` is the rank whose data this node sends on `channel`;
/// it is the local rank for direct transmits and another rank for relays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Connection direction.
    pub direction: Direction,
    /// Local slot.
    pub channel: ChannelIndex,
    /// Source rank of the carried data.
    pub peer: NodeRank,
    /// `false` when the connection dropped.
    pub connected: bool,
}

impl ConnectionEvent {
    /// Completed rx connection.
    pub fn rx(channel: ChannelIndex, peer: NodeRank) -> Self {
        Self {
            direction: Direction::Rx,
            channel,
            peer,
            connected: true,
        }
    }

    /// Completed tx connection.
    pub fn tx(channel: ChannelIndex, peer: NodeRank) -> Self {
        Self {
            direction: Direction::Tx,
            channel,
            peer,
            connected: true,
        }
    }

    /// The same connection, reported as dropped.
    #[must_use]
    pub fn dropped(mut self) -> Self {
        self.connected = false;
        self
    }
}

/// Long-haul network link to a partition partner came up or went down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConnectionEvent {
    /// Partner rank in another partition.
    pub peer: NodeRank,
    /// `false` when the link dropped.
    pub connected: bool,
}

impl NetworkConnectionEvent {
    /// Link came up.
    pub fn connected(peer: NodeRank) -> Self {
        Self {
            peer,
            connected: true,
        }
    }

    /// Link went down.
    pub fn disconnected(peer: NodeRank) -> Self {
        Self {
            peer,
            connected: false,
        }
    }
}

/// Hop chain from the local node to a peer, rendered as `0->2->5`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    hops: Vec<NodeRank>,
}

impl Route {
    /// One-hop route `from -> to`.
    pub fn direct(from: NodeRank, to: NodeRank) -> Self {
        Self {
            hops: vec![from, to],
        }
    }

    /// This route extended by one hop.
    #[must_use]
    pub fn extended(&self, next: NodeRank) -> Self {
        let mut hops = self.hops.clone();
        hops.push(next);
        Self { hops }
    }

    /// Hops including origin and destination.
    pub fn hops(&self) -> &[NodeRank] {
        &self.hops
    }

    /// Number of links traversed.
    pub fn hop_count(&self) -> usize {
        self.hops.len().saturating_sub(1)
    }

    /// Final hop.
    pub fn destination(&self) -> Option<NodeRank> {
        self.hops.last().copied()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                write!(f, "->")?;
            }
            write!(f, "{}", hop)?;
        }
        Ok(())
    }
}

/// Lifecycle phase of a router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RouterPhase {
    /// Connections are still being established.
    #[default]
    Forming,
    /// Every expected connection exists and the backend is locked.
    Ready,
    /// Terminal failure.
    Failed,
}

impl RouterPhase {
    /// Check if the transition to `next` is allowed.
    pub fn can_transition_to(&self, next: RouterPhase) -> bool {
        matches!(
            (self, next),
            (Self::Forming, Self::Ready) | (Self::Forming, Self::Failed) | (Self::Ready, Self::Failed)
        )
    }

    /// Check if no further progress is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}
