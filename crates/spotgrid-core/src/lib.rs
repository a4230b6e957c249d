//! spotgrid-core: shared types and configuration for spotgrid.
//!
//! Holds the per-cycle data model (thresholds, queue snapshot, instance and
//! agent records, fleet state), the `spotgrid.toml` parser with its
//! validation rules, and the agent-name rules that decide which workers
//! belong to the fleet.

pub mod config;
pub mod error;
pub mod ownership;
pub mod types;

pub use config::{CycleSettings, FileConfig};
pub use error::{ConfigError, ConfigResult, FieldError};
pub use ownership::{FleetOwnership, join_key};
pub use types::*;
