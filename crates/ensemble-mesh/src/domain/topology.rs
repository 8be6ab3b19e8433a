//! # Ensemble Topology
//!
//! Classifies the static membership list into one of the three supported
//! profiles and answers the structural questions the routers ask: who shares
//! my chassis, which partition is a rank in, who are my partition partners.
//!
//! ```text
//! Pair       2 nodes              0 ── 1
//! Cube       8 nodes, 2 chassis   [a b c d] ══ [e f g h]   (two cross links)
//! Hypercube  8·k nodes, k∈{1,2,4} partitions of 8 (rank / 8), each laid out
//!                                 like a Cube; rank % 8 pairs partitions
//! ```

use std::collections::BTreeMap;
use std::fmt;

use super::errors::ConfigurationError;
use super::value_objects::{EnsembleMember, NodeRank};

/// Members per chassis in the 8-node layouts.
pub const CHASSIS_SIZE: usize = 4;

/// Members per partition (and per Cube ensemble).
pub const PARTITION_SIZE: usize = 8;

/// Partition counts a Hypercube may have.
pub const HYPERCUBE_PARTITIONS: [usize; 3] = [1, 2, 4];

/// Extra transmit paths an outer Cube node relays once its cross link exists.
pub const CUBE_OUTER_EXTRA_TX: usize = 8;

/// Topology profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    /// Two directly linked nodes.
    Pair,
    /// Eight nodes in two chassis of four.
    Cube,
    /// One, two or four partitions of eight.
    Hypercube,
}

impl ProfileKind {
    /// Lower-case profile name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pair => "pair",
            Self::Cube => "cube",
            Self::Hypercube => "hypercube",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Profile requested by the embedding application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProfileRequest {
    /// 2 → Pair, 8 → Cube, 16/32 → Hypercube.
    #[default]
    Auto,
    /// Force a profile.
    Exact(ProfileKind),
}

impl std::str::FromStr for ProfileRequest {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "pair" => Ok(Self::Exact(ProfileKind::Pair)),
            "cube" => Ok(Self::Exact(ProfileKind::Cube)),
            "hypercube" => Ok(Self::Exact(ProfileKind::Hypercube)),
            other => Err(ConfigurationError::UnknownProfile(other.to_string())),
        }
    }
}

/// Static ensemble structure as seen from one member.
#[derive(Clone, Debug)]
pub struct EnsembleTopology {
    kind: ProfileKind,
    self_rank: NodeRank,
    members: BTreeMap<NodeRank, EnsembleMember>,
}

impl EnsembleTopology {
    /// Classify `members` automatically.
    pub fn new(members: Vec<EnsembleMember>, self_rank: NodeRank) -> Result<Self, ConfigurationError> {
        Self::with_profile(members, self_rank, ProfileRequest::Auto)
    }

    /// Build with an explicit profile request.
    pub fn with_profile(
        members: Vec<EnsembleMember>,
        self_rank: NodeRank,
        request: ProfileRequest,
    ) -> Result<Self, ConfigurationError> {
        let count = members.len();
        let mut by_rank = BTreeMap::new();
        for member in members {
            let rank = member.rank;
            if by_rank.insert(rank, member).is_some() {
                return Err(ConfigurationError::DuplicateRank(rank));
            }
        }
        if !by_rank.contains_key(&self_rank) {
            return Err(ConfigurationError::UnknownSelfRank(self_rank));
        }

        let kind = match request {
            ProfileRequest::Auto => match count {
                2 => ProfileKind::Pair,
                8 => ProfileKind::Cube,
                16 | 32 => ProfileKind::Hypercube,
                other => return Err(ConfigurationError::UnsupportedSize(other)),
            },
            ProfileRequest::Exact(kind) => kind,
        };

        let topology = Self {
            kind,
            self_rank,
            members: by_rank,
        };
        topology.validate()?;
        Ok(topology)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let count = self.members.len();
        match self.kind {
            ProfileKind::Pair => {
                if count != 2 {
                    return Err(self.size_mismatch());
                }
            }
            ProfileKind::Cube => {
                if count != PARTITION_SIZE {
                    return Err(self.size_mismatch());
                }
                let all: Vec<NodeRank> = self.members.keys().copied().collect();
                self.validate_chassis_layout(0, &all)?;
            }
            ProfileKind::Hypercube => {
                if count % PARTITION_SIZE != 0
                    || !HYPERCUBE_PARTITIONS.contains(&(count / PARTITION_SIZE))
                {
                    return Err(self.size_mismatch());
                }
                for expected in 0..count as NodeRank {
                    if !self.members.contains_key(&expected) {
                        return Err(ConfigurationError::NonContiguousRanks(expected));
                    }
                }
                for partition in 0..self.partition_count() {
                    let group = self.partition_members(partition);
                    self.validate_chassis_layout(partition, &group)?;
                }
            }
        }
        Ok(())
    }

    fn size_mismatch(&self) -> ConfigurationError {
        ConfigurationError::ProfileSizeMismatch {
            profile: self.kind.name().to_string(),
            count: self.members.len(),
        }
    }

    fn validate_chassis_layout(&self, group: usize, ranks: &[NodeRank]) -> Result<(), ConfigurationError> {
        let mut per_chassis: BTreeMap<&str, usize> = BTreeMap::new();
        for rank in ranks {
            if let Some(member) = self.members.get(rank) {
                *per_chassis.entry(member.chassis_id.as_str()).or_default() += 1;
            }
        }
        if per_chassis.len() != 2 {
            return Err(ConfigurationError::InvalidChassisLayout {
                group,
                detail: format!("expected 2 chassis, found {}", per_chassis.len()),
            });
        }
        if let Some((chassis, size)) = per_chassis.iter().find(|(_, n)| **n != CHASSIS_SIZE) {
            return Err(ConfigurationError::InvalidChassisLayout {
                group,
                detail: format!("chassis {} holds {} members", chassis, size),
            });
        }
        Ok(())
    }

    /// Profile this ensemble was classified as.
    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    /// Local rank.
    pub fn self_rank(&self) -> NodeRank {
        self.self_rank
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false for a validated topology.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member record for `rank`.
    pub fn member(&self, rank: NodeRank) -> Option<&EnsembleMember> {
        self.members.get(&rank)
    }

    /// Check if `rank` is a declared member.
    pub fn is_member(&self, rank: NodeRank) -> bool {
        self.members.contains_key(&rank)
    }

    /// All members in rank order.
    pub fn members(&self) -> impl Iterator<Item = &EnsembleMember> {
        self.members.values()
    }

    /// Chassis of `rank`.
    pub fn chassis_of(&self, rank: NodeRank) -> Option<&str> {
        self.members.get(&rank).map(|m| m.chassis_id.as_str())
    }

    /// Chassis of the local node.
    pub fn self_chassis(&self) -> &str {
        self.chassis_of(self.self_rank).unwrap_or_default()
    }

    /// Partition index (`rank / 8`). Always 0 outside the Hypercube profile.
    pub fn partition_of(&self, rank: NodeRank) -> usize {
        match self.kind {
            ProfileKind::Hypercube => rank as usize / PARTITION_SIZE,
            _ => 0,
        }
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> usize {
        match self.kind {
            ProfileKind::Hypercube => self.members.len() / PARTITION_SIZE,
            _ => 1,
        }
    }

    /// Members of `partition`, in rank order.
    pub fn partition_members(&self, partition: usize) -> Vec<NodeRank> {
        self.members
            .keys()
            .copied()
            .filter(|rank| self.partition_of(*rank) == partition)
            .collect()
    }

    /// Check if two ranks share a partition.
    pub fn same_partition(&self, a: NodeRank, b: NodeRank) -> bool {
        self.partition_of(a) == self.partition_of(b)
    }

    /// Check if two ranks share a chassis (and partition).
    pub fn same_chassis(&self, a: NodeRank, b: NodeRank) -> bool {
        self.same_partition(a, b)
            && matches!((self.chassis_of(a), self.chassis_of(b)), (Some(x), Some(y)) if x == y)
    }

    /// Other members sharing `rank`'s chassis, in rank order.
    pub fn chassis_peers(&self, rank: NodeRank) -> Vec<NodeRank> {
        self.members
            .keys()
            .copied()
            .filter(|other| *other != rank && self.same_chassis(rank, *other))
            .collect()
    }

    /// Ranks in other partitions with the same `rank % 8`.
    pub fn partition_partners(&self, rank: NodeRank) -> Vec<NodeRank> {
        if self.kind != ProfileKind::Hypercube {
            return Vec::new();
        }
        let slot = rank as usize % PARTITION_SIZE;
        self.members
            .keys()
            .copied()
            .filter(|other| {
                *other as usize % PARTITION_SIZE == slot && !self.same_partition(rank, *other)
            })
            .collect()
    }

    /// Peers the local node must receive from over the mesh.
    pub fn expected_rx(&self) -> usize {
        match self.kind {
            ProfileKind::Pair => 1,
            ProfileKind::Cube | ProfileKind::Hypercube => PARTITION_SIZE - 1,
        }
    }

    /// Transmit paths known at construction time.
    ///
    /// A Cube node starts at its three in-chassis links and revises upward
    /// when it turns out to be an outer node.
    pub fn base_expected_tx(&self) -> usize {
        match self.kind {
            ProfileKind::Pair => 1,
            ProfileKind::Cube => CHASSIS_SIZE - 1,
            ProfileKind::Hypercube => PARTITION_SIZE - 1,
        }
    }

    /// Long-haul network links to partition partners.
    pub fn expected_network(&self) -> usize {
        self.partition_partners(self.self_rank).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Vec<EnsembleMember> {
        vec![EnsembleMember::new(0, "A"), EnsembleMember::new(1, "B")]
    }

    fn grid(count: u32) -> Vec<EnsembleMember> {
        (0..count)
            .map(|rank| {
                let partition = rank / 8;
                let chassis = if rank % 8 < 4 { "a" } else { "b" };
                EnsembleMember::new(rank, format!("p{}-{}", partition, chassis))
                    .with_hostname(format!("node{}", rank))
            })
            .collect()
    }

    #[test]
    fn test_classify_pair() {
        let topo = EnsembleTopology::new(pair(), 0).unwrap();
        assert_eq!(topo.kind(), ProfileKind::Pair);
        assert_eq!(topo.expected_rx(), 1);
        assert_eq!(topo.base_expected_tx(), 1);
        assert_eq!(topo.expected_network(), 0);
    }

    #[test]
    fn test_classify_cube() {
        let topo = EnsembleTopology::new(grid(8), 2).unwrap();
        assert_eq!(topo.kind(), ProfileKind::Cube);
        assert_eq!(topo.chassis_peers(2), vec![0, 1, 3]);
        assert_eq!(topo.base_expected_tx(), 3);
    }

    #[test]
    fn test_classify_hypercube_sixteen() {
        let topo = EnsembleTopology::new(grid(16), 9).unwrap();
        assert_eq!(topo.kind(), ProfileKind::Hypercube);
        assert_eq!(topo.partition_of(9), 1);
        assert_eq!(topo.partition_count(), 2);
        assert_eq!(topo.partition_partners(9), vec![1]);
        assert_eq!(topo.expected_network(), 1);
        assert_eq!(topo.chassis_peers(9), vec![8, 10, 11]);
    }

    #[test]
    fn test_hypercube_thirty_two_partners() {
        let topo = EnsembleTopology::new(grid(32), 5).unwrap();
        assert_eq!(topo.partition_partners(5), vec![13, 21, 29]);
        assert_eq!(topo.expected_network(), 3);
    }

    #[test]
    fn test_eight_node_hypercube_requires_explicit_request() {
        let request = ProfileRequest::Exact(ProfileKind::Hypercube);
        let topo = EnsembleTopology::with_profile(grid(8), 0, request).unwrap();
        assert_eq!(topo.kind(), ProfileKind::Hypercube);
        assert_eq!(topo.expected_network(), 0);
        assert_eq!(topo.base_expected_tx(), 7);
    }

    #[test]
    fn test_rejects_unsupported_size() {
        let err = EnsembleTopology::new(grid(4), 0).unwrap_err();
        assert_eq!(err, ConfigurationError::UnsupportedSize(4));
    }

    #[test]
    fn test_rejects_duplicate_rank() {
        let mut members = pair();
        members[1].rank = 0;
        let err = EnsembleTopology::new(members, 0).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateRank(0));
    }

    #[test]
    fn test_rejects_unknown_self() {
        let err = EnsembleTopology::new(pair(), 7).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownSelfRank(7));
    }

    #[test]
    fn test_rejects_lopsided_chassis() {
        let mut members = grid(8);
        members[4].chassis_id = "p0-a".to_string();
        let err = EnsembleTopology::new(members, 0).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidChassisLayout { group: 0, .. }));
    }

    #[test]
    fn test_rejects_three_chassis() {
        let mut members = grid(8);
        members[7].chassis_id = "third".to_string();
        let err = EnsembleTopology::new(members, 0).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidChassisLayout { .. }));
    }

    #[test]
    fn test_rejects_non_contiguous_hypercube() {
        let mut members = grid(16);
        members[15].rank = 40;
        let err = EnsembleTopology::new(members, 0).unwrap_err();
        assert_eq!(err, ConfigurationError::NonContiguousRanks(15));
    }

    #[test]
    fn test_profile_request_parse() {
        assert_eq!("auto".parse::<ProfileRequest>().unwrap(), ProfileRequest::Auto);
        assert_eq!(
            "Hypercube".parse::<ProfileRequest>().unwrap(),
            ProfileRequest::Exact(ProfileKind::Hypercube)
        );
        assert!("torus".parse::<ProfileRequest>().is_err());
    }
}
