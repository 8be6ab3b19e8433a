//! # Runtime Roles
//!
//! Roles are discovered from physical link events, not configured. Each one
//! is assigned at most once; re-assignment is rejected so callers can treat
//! it as a duplicate link instead of silently rewriting state.

use thiserror::Error;

use super::value_objects::NodeRank;

/// Role assignment rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    /// A role or partner was already recorded.
    #[error("Role already assigned ({current})")]
    AlreadyAssigned {
        /// Existing assignment
        current: String,
    },
}

/// Role of a node within its chassis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NodeRole {
    /// No cross-chassis link observed (yet).
    #[default]
    Unknown,
    /// Holds a cross-chassis link to `partner`.
    Outer {
        /// Cross-chassis peer
        partner: NodeRank,
    },
}

impl NodeRole {
    /// One-shot transition to `Outer`.
    pub fn assign_outer(&mut self, partner: NodeRank) -> Result<(), RoleError> {
        match self {
            Self::Unknown => {
                *self = Self::Outer { partner };
                Ok(())
            }
            Self::Outer { partner: current } => Err(RoleError::AlreadyAssigned {
                current: format!("outer with partner {}", current),
            }),
        }
    }

    /// Check if this is an outer node.
    pub fn is_outer(&self) -> bool {
        matches!(self, Self::Outer { .. })
    }

    /// Cross-chassis partner, if outer.
    pub fn partner(&self) -> Option<NodeRank> {
        match self {
            Self::Outer { partner } => Some(*partner),
            Self::Unknown => None,
        }
    }
}

/// A value that may be written exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OnceSlot<T> {
    value: Option<T>,
}

impl<T> Default for OnceSlot<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T: Copy + std::fmt::Debug> OnceSlot<T> {
    /// Empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the value; fails if already written.
    pub fn set(&mut self, value: T) -> Result<(), RoleError> {
        if let Some(current) = self.value {
            return Err(RoleError::AlreadyAssigned {
                current: format!("{:?}", current),
            });
        }
        self.value = Some(value);
        Ok(())
    }

    /// Current value.
    pub fn get(&self) -> Option<T> {
        self.value
    }
}
