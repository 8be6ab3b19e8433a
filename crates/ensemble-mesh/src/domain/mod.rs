//! # Domain Module
//!
//! Pure mesh-formation logic with no I/O: ensemble structure, per-peer
//! connectivity bookkeeping, runtime roles and router counters.

pub mod errors;
pub mod invariants;
pub mod ledger;
pub mod roles;
pub mod services;
pub mod state;
pub mod topology;
pub mod value_objects;

pub use errors::*;
pub use invariants::*;
pub use ledger::*;
pub use roles::*;
pub use services::*;
pub use state::*;
pub use topology::*;
pub use value_objects::*;
