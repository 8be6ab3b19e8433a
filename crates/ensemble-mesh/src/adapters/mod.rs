//! # Adapters Layer
//!
//! Integrations outside the pure router core:
//!
//! - `config` - TOML ensemble membership (feature `config`)
//! - `driver` - tokio delivery queue, one task per router (feature `runtime`)

#[cfg(feature = "config")]
pub mod config;

#[cfg(feature = "runtime")]
pub mod driver;

#[cfg(feature = "config")]
pub use config::EnsembleConfig;

#[cfg(feature = "runtime")]
pub use driver::{spawn_router, spawn_router_with_capacity, MeshEvent, RouterHandle};
