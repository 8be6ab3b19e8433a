//! Centralized Testing Utilities
//!
//! Recording doubles for the outbound ports and an in-process fabric that
//! wires a whole ensemble together and delivers its events in FIFO order, or
//! in a seeded random order that still honours the delivery contract.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::ControlMessage;
use crate::domain::{
    BackendError, ChannelEvent, ChannelIndex, ConnectionEvent, EnsembleMember, EnsembleTopology, FailureReason,
    MeshError, NetworkConnectionEvent, NodeRank, ProfileKind, ProfileRequest, CHASSIS_SIZE, PARTITION_SIZE,
};
use crate::ports::{EnsembleDelegate, MeshBackend, RouterSnapshot};
use crate::service::EnsembleService;

/// Members `0..count` laid out in partitions of eight, each split into
/// chassis `p{partition}-a` (slots 0-3) and `p{partition}-b` (slots 4-7).
/// Every member gets hostname `node{rank}`.
pub fn ensemble_members(count: u32) -> Vec<EnsembleMember> {
    (0..count)
        .map(|rank| {
            let partition = rank as usize / PARTITION_SIZE;
            let side = if (rank as usize % PARTITION_SIZE) < CHASSIS_SIZE { "a" } else { "b" };
            EnsembleMember::new(rank, format!("p{}-{}", partition, side)).with_hostname(format!("node{}", rank))
        })
        .collect()
}

/// Physical links of the reference layout for `kind`.
///
/// Inside every chassis all members are linked. Cube partitions get the two
/// cross links `0-4` and `1-5`; Hypercube partitions get `k-(k+4)` for every
/// slot. A Pair is a single `0-1` link.
pub fn reference_links(kind: ProfileKind, count: u32) -> Vec<(NodeRank, NodeRank)> {
    if kind == ProfileKind::Pair {
        return vec![(0, 1)];
    }
    let chassis = CHASSIS_SIZE as u32;
    let cross_slots = if kind == ProfileKind::Cube { 2 } else { chassis };
    let mut links = Vec::new();
    for base in (0..count).step_by(PARTITION_SIZE) {
        for first in [base, base + chassis] {
            for a in first..first + chassis {
                for b in a + 1..first + chassis {
                    links.push((a, b));
                }
            }
        }
        for slot in 0..cross_slots {
            links.push((base + slot, base + slot + chassis));
        }
    }
    links
}

// =============================================================================
// RECORDING DOUBLES
// =============================================================================

/// A call made on a [`RecordingBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    /// `establish_transmit`
    EstablishTransmit {
        /// Rank whose data is sent
        source: NodeRank,
        /// Local slot
        channel: ChannelIndex,
    },
    /// `disable_channel`
    DisableChannel {
        /// Local slot
        channel: ChannelIndex,
    },
    /// `lock`
    Lock,
    /// `send_control_message`
    SendControlMessage {
        /// Destination rank
        to: NodeRank,
        /// Encoded message
        payload: Vec<u8>,
    },
}

/// Backend that records every call and can be told to fail an operation.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
    failing: Mutex<BTreeSet<&'static str>>,
}

impl RecordingBackend {
    /// Backend that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call to `operation` fail.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    /// Calls so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Number of `lock` calls.
    pub fn lock_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| **c == BackendCall::Lock).count()
    }

    /// Decoded control messages sent so far.
    pub fn sent(&self) -> Vec<(NodeRank, ControlMessage)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::SendControlMessage { to, payload } => {
                    ControlMessage::decode(payload).ok().map(|message| (*to, message))
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, operation: &'static str, call: BackendCall) -> Result<(), BackendError> {
        if self.failing.lock().contains(operation) {
            return Err(BackendError::new(operation, "injected failure"));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

impl MeshBackend for RecordingBackend {
    fn establish_transmit(&self, source: NodeRank, channel: ChannelIndex) -> Result<(), BackendError> {
        self.record("establish_transmit", BackendCall::EstablishTransmit { source, channel })
    }

    fn disable_channel(&self, channel: ChannelIndex) -> Result<(), BackendError> {
        self.record("disable_channel", BackendCall::DisableChannel { channel })
    }

    fn lock(&self) -> Result<(), BackendError> {
        self.record("lock", BackendCall::Lock)
    }

    fn send_control_message(&self, to: NodeRank, payload: &[u8]) -> Result<(), BackendError> {
        self.record(
            "send_control_message",
            BackendCall::SendControlMessage {
                to,
                payload: payload.to_vec(),
            },
        )
    }
}

/// Delegate that records every callback.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    ready: Mutex<usize>,
    failures: Mutex<Vec<FailureReason>>,
    hostnames: Mutex<Vec<(String, NodeRank)>>,
}

impl RecordingDelegate {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `ensemble_ready` calls.
    pub fn ready_count(&self) -> usize {
        *self.ready.lock()
    }

    /// Number of `ensemble_failed` calls.
    pub fn failed_count(&self) -> usize {
        self.failures.lock().len()
    }

    /// Failure reasons, in order.
    pub fn failures(&self) -> Vec<FailureReason> {
        self.failures.lock().clone()
    }

    /// `add_peer_hostname` calls, in order.
    pub fn hostnames(&self) -> Vec<(String, NodeRank)> {
        self.hostnames.lock().clone()
    }
}

impl EnsembleDelegate for RecordingDelegate {
    fn ensemble_ready(&self) {
        *self.ready.lock() += 1;
    }

    fn ensemble_failed(&self, reason: &FailureReason) {
        self.failures.lock().push(reason.clone());
    }

    fn add_peer_hostname(&self, hostname: &str, rank: NodeRank) {
        self.hostnames.lock().push((hostname.to_string(), rank));
    }
}

// =============================================================================
// SIMULATED FABRIC
// =============================================================================

/// Something the fabric delivers to one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FabricEvent {
    /// Physical channel event.
    Channel(NodeRank, ChannelEvent),
    /// rx/tx completion.
    Connection(NodeRank, ConnectionEvent),
    /// Long-haul network link event.
    Network(NodeRank, NetworkConnectionEvent),
    /// Encoded control message.
    Control(NodeRank, Vec<u8>),
}

impl FabricEvent {
    /// Node the event is delivered to.
    pub fn target(&self) -> NodeRank {
        match self {
            Self::Channel(rank, _) | Self::Connection(rank, _) | Self::Network(rank, _) | Self::Control(rank, _) => {
                *rank
            }
        }
    }
}

/// Queue entry. A transmit is delivered as its tx completion at the near end
/// immediately followed by the rx completion at the far end.
#[derive(Debug)]
enum Pending {
    Event(FabricEvent),
    Transmit {
        near: NodeRank,
        tx: ConnectionEvent,
        far: NodeRank,
        rx: ConnectionEvent,
    },
}

type EventQueue = Arc<Mutex<VecDeque<Pending>>>;

/// Whether entry `index` may be delivered now under shuffled order.
///
/// Completions wait for the channel event on their slot, and control
/// messages to one rank keep their send order.
fn deliverable(queue: &VecDeque<Pending>, index: usize, discovered: &BTreeSet<(NodeRank, ChannelIndex)>) -> bool {
    match &queue[index] {
        Pending::Event(FabricEvent::Connection(rank, event)) => discovered.contains(&(*rank, event.channel)),
        Pending::Transmit { far, rx, .. } => discovered.contains(&(*far, rx.channel)),
        Pending::Event(FabricEvent::Control(to, _)) => !queue
            .iter()
            .take(index)
            .any(|earlier| matches!(earlier, Pending::Event(FabricEvent::Control(other, _)) if other == to)),
        Pending::Event(_) => true,
    }
}

/// Backend of one fabric node: turns a transmit request into a tx completion
/// here and an rx completion at the far end of the channel.
struct FabricBackend {
    rank: NodeRank,
    wiring: BTreeMap<ChannelIndex, (NodeRank, ChannelIndex)>,
    queue: EventQueue,
    recorder: RecordingBackend,
}

impl MeshBackend for FabricBackend {
    fn establish_transmit(&self, source: NodeRank, channel: ChannelIndex) -> Result<(), BackendError> {
        self.recorder.establish_transmit(source, channel)?;
        let (peer, peer_channel) = self
            .wiring
            .get(&channel)
            .copied()
            .ok_or_else(|| BackendError::new("establish_transmit", format!("channel {} not cabled", channel)))?;
        self.queue.lock().push_back(Pending::Transmit {
            near: self.rank,
            tx: ConnectionEvent::tx(channel, source),
            far: peer,
            rx: ConnectionEvent::rx(peer_channel, source),
        });
        Ok(())
    }

    fn disable_channel(&self, channel: ChannelIndex) -> Result<(), BackendError> {
        self.recorder.disable_channel(channel)
    }

    fn lock(&self) -> Result<(), BackendError> {
        self.recorder.lock()
    }

    fn send_control_message(&self, to: NodeRank, payload: &[u8]) -> Result<(), BackendError> {
        self.recorder.send_control_message(to, payload)?;
        self.queue
            .lock()
            .push_back(Pending::Event(FabricEvent::Control(to, payload.to_vec())));
        Ok(())
    }
}

struct FabricNode {
    service: EnsembleService,
    backend: Arc<FabricBackend>,
    delegate: Arc<RecordingDelegate>,
}

/// In-process ensemble: one service per member, cabled by a link list.
pub struct SimulatedFabric {
    nodes: BTreeMap<NodeRank, FabricNode>,
    queue: EventQueue,
    shuffle: Option<StdRng>,
    discovered: BTreeSet<(NodeRank, ChannelIndex)>,
    errors: Vec<(NodeRank, MeshError)>,
    delivered: usize,
}

impl SimulatedFabric {
    /// Upper bound on delivered events per [`run`](Self::run).
    pub const MAX_EVENTS: usize = 100_000;

    /// Reference members and links for `count` nodes under `request`.
    pub fn reference(count: u32, request: ProfileRequest) -> Result<Self, MeshError> {
        let members = ensemble_members(count);
        let probe = EnsembleTopology::with_profile(members.clone(), 0, request)?;
        let links = reference_links(probe.kind(), count);
        Self::new(members, request, &links)
    }

    /// Build every node and queue the channel events for `links`.
    ///
    /// Each node numbers its channels from 0 in link order.
    pub fn new(
        members: Vec<EnsembleMember>,
        request: ProfileRequest,
        links: &[(NodeRank, NodeRank)],
    ) -> Result<Self, MeshError> {
        let chassis: BTreeMap<NodeRank, String> =
            members.iter().map(|m| (m.rank, m.chassis_id.clone())).collect();
        let mut wiring: BTreeMap<NodeRank, BTreeMap<ChannelIndex, (NodeRank, ChannelIndex)>> = BTreeMap::new();
        let mut announcements = Vec::new();
        for (a, b) in links {
            let ca = wiring.get(a).map_or(0, |w| w.len() as ChannelIndex);
            let cb = wiring.get(b).map_or(0, |w| w.len() as ChannelIndex);
            wiring.entry(*a).or_default().insert(ca, (*b, cb));
            wiring.entry(*b).or_default().insert(cb, (*a, ca));
            announcements.push((*a, ca, *b));
            announcements.push((*b, cb, *a));
        }

        let queue: EventQueue = Arc::default();
        let mut nodes = BTreeMap::new();
        for member in &members {
            let topology = EnsembleTopology::with_profile(members.clone(), member.rank, request)?;
            let backend = Arc::new(FabricBackend {
                rank: member.rank,
                wiring: wiring.remove(&member.rank).unwrap_or_default(),
                queue: queue.clone(),
                recorder: RecordingBackend::new(),
            });
            let delegate = Arc::new(RecordingDelegate::new());
            let service = EnsembleService::new(topology, backend.clone(), delegate.clone())?;
            nodes.insert(member.rank, FabricNode { service, backend, delegate });
        }

        {
            let mut pending = queue.lock();
            for (rank, channel, peer) in announcements {
                let peer_chassis = chassis.get(&peer).cloned().unwrap_or_default();
                let event = ChannelEvent::connected(channel, peer, peer_chassis);
                pending.push_back(Pending::Event(FabricEvent::Channel(rank, event)));
            }
            for (rank, node) in &nodes {
                for (_, peer) in node.delegate.hostnames() {
                    let event = NetworkConnectionEvent::connected(peer);
                    pending.push_back(Pending::Event(FabricEvent::Network(*rank, event)));
                }
            }
        }

        Ok(Self {
            nodes,
            queue,
            shuffle: None,
            discovered: BTreeSet::new(),
            errors: Vec::new(),
            delivered: 0,
        })
    }

    /// Deliver in a random order drawn from `seed` instead of FIFO.
    ///
    /// A completion is held back until its node has seen the channel event
    /// for its slot, a transmit's tx and rx completions stay back to back,
    /// and control messages to the same rank arrive in send order.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// Queue an extra event.
    pub fn inject(&self, event: FabricEvent) {
        self.queue.lock().push_back(Pending::Event(event));
    }

    /// Deliver events until the queue drains. Returns the number delivered.
    pub fn run(&mut self) -> usize {
        let mut delivered = 0;
        while delivered < Self::MAX_EVENTS {
            let Some(pending) = self.next_pending() else {
                break;
            };
            match pending {
                Pending::Event(event) => {
                    self.deliver(event);
                    delivered += 1;
                }
                Pending::Transmit { near, tx, far, rx } => {
                    self.deliver(FabricEvent::Connection(near, tx));
                    self.deliver(FabricEvent::Connection(far, rx));
                    delivered += 2;
                }
            }
        }
        self.delivered += delivered;
        delivered
    }

    fn next_pending(&mut self) -> Option<Pending> {
        let mut queue = self.queue.lock();
        let index = match self.shuffle.as_mut() {
            None => 0,
            Some(rng) => {
                let eligible: Vec<usize> = (0..queue.len())
                    .filter(|index| deliverable(&queue, *index, &self.discovered))
                    .collect();
                if eligible.is_empty() {
                    0
                } else {
                    eligible[rng.gen_range(0..eligible.len())]
                }
            }
        };
        queue.remove(index)
    }

    fn deliver(&mut self, event: FabricEvent) {
        let rank = event.target();
        if let FabricEvent::Channel(_, e) = &event {
            if e.connected {
                self.discovered.insert((rank, e.channel));
            }
        }
        let Some(node) = self.nodes.get_mut(&rank) else {
            return;
        };
        let result = match event {
            FabricEvent::Channel(_, e) => node.service.handle_channel_event(e),
            FabricEvent::Connection(_, e) => node.service.handle_connection_event(e),
            FabricEvent::Network(_, e) => node.service.handle_network_event(e),
            FabricEvent::Control(_, payload) => node.service.handle_control_bytes(&payload),
        };
        if let Err(err) = result {
            self.errors.push((rank, err));
        }
    }

    /// Ranks in the ensemble.
    pub fn ranks(&self) -> Vec<NodeRank> {
        self.nodes.keys().copied().collect()
    }

    /// Errors returned by any node so far.
    pub fn errors(&self) -> &[(NodeRank, MeshError)] {
        &self.errors
    }

    /// Total events delivered.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Check if every node is ready.
    pub fn all_ready(&self) -> bool {
        self.nodes.values().all(|node| node.service.is_ready())
    }

    /// Snapshot of one node.
    pub fn snapshot(&self, rank: NodeRank) -> Option<RouterSnapshot> {
        self.nodes.get(&rank).map(|node| node.service.snapshot())
    }

    /// Delegate of one node.
    pub fn delegate(&self, rank: NodeRank) -> Option<&RecordingDelegate> {
        self.nodes.get(&rank).map(|node| node.delegate.as_ref())
    }

    /// Backend calls of one node.
    pub fn backend_calls(&self, rank: NodeRank) -> Vec<BackendCall> {
        self.nodes
            .get(&rank)
            .map(|node| node.backend.recorder.calls())
            .unwrap_or_default()
    }
}
