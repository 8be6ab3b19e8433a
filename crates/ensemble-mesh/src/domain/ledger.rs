//! # Connectivity Ledger
//!
//! Per-peer record of how this node receives from and transmits toward every
//! other member, plus the hop chain used to reach it.
//!
//! ## Update rules
//!
//! - `input_channel` is written by exactly one rx completion and never
//!   overwritten.
//! - `output_channels` is append-only.
//! - `route` is written once; later writers are ignored.

use std::collections::BTreeMap;

use thiserror::Error;

use super::value_objects::{ChannelIndex, NodeRank, Route};

/// Ledger write rejected by the update rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A second rx completion named the same source.
    #[error("Input channel for rank {peer} already set to {existing}")]
    InputAlreadySet {
        /// Source rank
        peer: NodeRank,
        /// Channel recorded first
        existing: ChannelIndex,
    },
}

/// Bookkeeping for a single peer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerConnectivity {
    input_channel: Option<ChannelIndex>,
    output_channels: Vec<ChannelIndex>,
    route: Option<Route>,
}

impl PeerConnectivity {
    /// Channel this node receives the peer's data on.
    pub fn input_channel(&self) -> Option<ChannelIndex> {
        self.input_channel
    }

    /// Channels this node transmits on toward the peer.
    pub fn output_channels(&self) -> &[ChannelIndex] {
        &self.output_channels
    }

    /// How this node reaches the peer.
    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    /// Input known and a one-hop route exists.
    pub fn is_mutually_direct(&self) -> bool {
        self.input_channel.is_some() && self.route.as_ref().is_some_and(|r| r.hop_count() == 1)
    }
}

/// Read-only copy of one ledger row's channel data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferEntry {
    /// Channel the peer's data arrives on.
    pub input_channel: Option<ChannelIndex>,
    /// Channels used toward the peer.
    pub output_channels: Vec<ChannelIndex>,
}

/// Snapshot type returned by `transfer_map`.
pub type TransferMap = BTreeMap<NodeRank, TransferEntry>;

/// Snapshot type returned by `routes`.
pub type RouteMap = BTreeMap<NodeRank, String>;

/// Rank-keyed ledger owned by one router.
#[derive(Clone, Debug, Default)]
pub struct ConnectivityLedger {
    entries: BTreeMap<NodeRank, PeerConnectivity>,
}

impl ConnectivityLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for `peer` if it does not exist yet.
    pub fn ensure(&mut self, peer: NodeRank) -> &mut PeerConnectivity {
        self.entries.entry(peer).or_default()
    }

    /// Entry for `peer`.
    pub fn get(&self, peer: NodeRank) -> Option<&PeerConnectivity> {
        self.entries.get(&peer)
    }

    /// Check if `peer` has an entry.
    pub fn contains(&self, peer: NodeRank) -> bool {
        self.entries.contains_key(&peer)
    }

    /// Number of peers tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no peer is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record the rx channel for `peer`.
    pub fn set_input(&mut self, peer: NodeRank, channel: ChannelIndex) -> Result<(), LedgerError> {
        let entry = self.ensure(peer);
        if let Some(existing) = entry.input_channel {
            return Err(LedgerError::InputAlreadySet { peer, existing });
        }
        entry.input_channel = Some(channel);
        Ok(())
    }

    /// Append a tx channel toward `peer`.
    pub fn push_output(&mut self, peer: NodeRank, channel: ChannelIndex) {
        self.ensure(peer).output_channels.push(channel);
    }

    /// Record the route to `peer`. Returns `false` if one was already set.
    pub fn set_route(&mut self, peer: NodeRank, route: Route) -> bool {
        let entry = self.ensure(peer);
        if entry.route.is_some() {
            return false;
        }
        entry.route = Some(route);
        true
    }

    /// Rx channel for `peer`.
    pub fn input_channel(&self, peer: NodeRank) -> Option<ChannelIndex> {
        self.get(peer).and_then(PeerConnectivity::input_channel)
    }

    /// Route to `peer`.
    pub fn route(&self, peer: NodeRank) -> Option<&Route> {
        self.get(peer).and_then(PeerConnectivity::route)
    }

    /// Check if `peer` is reached over a single direct hop in both directions.
    pub fn is_mutually_direct(&self, peer: NodeRank) -> bool {
        self.get(peer).is_some_and(PeerConnectivity::is_mutually_direct)
    }

    /// Sources whose data arrives on `channel`, in rank order.
    pub fn sources_on(&self, channel: ChannelIndex) -> Vec<NodeRank> {
        self.entries
            .iter()
            .filter(|(_, e)| e.input_channel == Some(channel))
            .map(|(rank, _)| *rank)
            .collect()
    }

    /// Channel data for every tracked peer.
    pub fn transfer_map(&self) -> TransferMap {
        self.entries
            .iter()
            .map(|(rank, e)| {
                (
                    *rank,
                    TransferEntry {
                        input_channel: e.input_channel,
                        output_channels: e.output_channels.clone(),
                    },
                )
            })
            .collect()
    }

    /// Rendered routes for every peer that has one.
    pub fn routes(&self) -> RouteMap {
        self.entries
            .iter()
            .filter_map(|(rank, e)| e.route.as_ref().map(|r| (*rank, r.to_string())))
            .collect()
    }
}
