//! # Ensemble Configuration
//!
//! Static membership loaded from TOML.
//!
//! ```toml
//! self_rank = 2
//! profile = "auto"          # auto | pair | cube | hypercube
//!
//! [[members]]
//! rank = 0
//! chassis_id = "rack1-a"
//! hostname = "node0.cluster"
//!
//! [[members]]
//! rank = 1
//! chassis_id = "rack1-a"
//! # ...
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::domain::{ConfigurationError, EnsembleMember, EnsembleTopology, NodeRank, ProfileRequest};

fn default_profile() -> String {
    "auto".to_string()
}

/// Ensemble membership as seen from one node.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct EnsembleConfig {
    /// Rank of the local node.
    pub self_rank: NodeRank,
    /// Requested profile name.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Every member, including the local node.
    #[serde(default)]
    pub members: Vec<EnsembleMember>,
}

impl EnsembleConfig {
    /// Config with automatic profile selection.
    pub fn new(self_rank: NodeRank, members: Vec<EnsembleMember>) -> Self {
        Self {
            self_rank,
            profile: default_profile(),
            members,
        }
    }

    /// Request a profile by name.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(content).map_err(|e| ConfigurationError::Source(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Source` if the file cannot be read or
    /// parsed. Membership is not validated until [`topology`](Self::topology).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigurationError::Source(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parsed profile request.
    pub fn profile_request(&self) -> Result<ProfileRequest, ConfigurationError> {
        self.profile.parse()
    }

    /// Validate membership and classify it.
    pub fn topology(&self) -> Result<EnsembleTopology, ConfigurationError> {
        EnsembleTopology::with_profile(self.members.clone(), self.self_rank, self.profile_request()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProfileKind;
    use crate::testing::ensemble_members;

    const PAIR: &str = r#"
        self_rank = 1

        [[members]]
        rank = 0
        chassis_id = "left"

        [[members]]
        rank = 1
        chassis_id = "right"
        hostname = "node1"
    "#;

    #[test]
    fn test_parse_pair() {
        let config = EnsembleConfig::from_toml_str(PAIR).unwrap();
        assert_eq!(config.self_rank, 1);
        assert_eq!(config.profile, "auto");
        assert_eq!(config.members[1].hostname.as_deref(), Some("node1"));
        assert_eq!(config.members[0].hostname, None);

        let topology = config.topology().unwrap();
        assert_eq!(topology.kind(), ProfileKind::Pair);
        assert_eq!(topology.self_rank(), 1);
    }

    #[test]
    fn test_explicit_profile() {
        let config = EnsembleConfig::new(3, ensemble_members(8)).with_profile("hypercube");
        assert_eq!(config.topology().unwrap().kind(), ProfileKind::Hypercube);
    }

    #[test]
    fn test_unknown_profile() {
        let config = EnsembleConfig::new(0, ensemble_members(8)).with_profile("torus");
        assert_eq!(
            config.topology().unwrap_err(),
            ConfigurationError::UnknownProfile("torus".to_string())
        );
    }

    #[test]
    fn test_invalid_membership_surfaces_on_topology() {
        let config = EnsembleConfig::new(0, ensemble_members(4));
        assert_eq!(config.topology().unwrap_err(), ConfigurationError::UnsupportedSize(4));
    }

    #[test]
    fn test_malformed_toml() {
        let err = EnsembleConfig::from_toml_str("self_rank = \"zero\"").unwrap_err();
        assert!(matches!(err, ConfigurationError::Source(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EnsembleConfig::load("/nonexistent/ensemble.toml").unwrap_err();
        assert!(matches!(err, ConfigurationError::Source(msg) if msg.contains("ensemble.toml")));
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join(format!("ensemble-mesh-{}.toml", std::process::id()));
        fs::write(&path, PAIR).unwrap();
        let config = EnsembleConfig::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.members.len(), 2);
    }
}
