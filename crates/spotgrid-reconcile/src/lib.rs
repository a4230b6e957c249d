//! spotgrid-reconcile: applies scaling decisions and keeps the agent pool
//! in step with fleet membership.
//!
//! One call to [`CycleRunner::run_cycle`] is one decision cycle:
//!
//! ```text
//! CycleRunner
//!   ├── gather     FleetApi + BuildQueue + AgentRegistry → FleetState, QueueSnapshot
//!   ├── decide     spotgrid-autoscale::decide
//!   ├── apply      FleetReconciler: terminate → modify capacity → tag
//!   ├── reconcile  AgentPoolReconciler: abort builds → remove stale agents
//!   └── cancel     FleetReconciler::cancel_fleet (only with an empty queue)
//! ```
//!
//! External systems are reached only through the traits in [`ports`], so
//! every phase runs against the in-memory implementations in [`memory`].

pub mod agents;
pub mod cycle;
pub mod error;
pub mod fleet;
pub mod memory;
pub mod ports;
pub mod telemetry;

pub use agents::{AgentPoolReconciler, TeardownSummary};
pub use cycle::{
    Collaborators, CycleReport, CycleRunner, DecisionSummary, Phase, PhaseReport, PhaseStatus,
};
pub use error::{BuildServerError, ErrorClass, FleetApiError, FleetResult, ServerResult};
pub use fleet::FleetReconciler;
pub use memory::{MemoryBuildServer, MemoryFleet, World};
pub use ports::{AgentRegistry, BoxFuture, BuildQueue, ExecutionTracker, FleetApi};
