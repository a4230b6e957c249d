//! Collaborator traits: the only way spotgrid reaches external systems.
//!
//! Each trait is object-safe and returns boxed `Send` futures so that the
//! orchestrator can hold `Arc<dyn Trait>` and tests can inject in-memory
//! implementations.

use std::future::Future;
use std::pin::Pin;

use spotgrid_core::{
    AgentId, AgentRecord, FleetDescription, InstanceDescription, InstanceId, QueuedItem,
    ResultKey, RunningBuild,
};

use crate::error::{FleetResult, ServerResult};

/// Boxed future returned by collaborator methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fleet provider API.
pub trait FleetApi: Send + Sync {
    /// Target capacity and request state of the fleet.
    fn describe_fleet(&self, fleet_id: &str) -> BoxFuture<'_, FleetResult<FleetDescription>>;

    /// Ids of instances the fleet currently has running.
    fn describe_fleet_instances(&self, fleet_id: &str) -> BoxFuture<'_, FleetResult<Vec<InstanceId>>>;

    /// Network identity of the given instances.
    fn describe_instances<'a>(
        &'a self,
        instance_ids: &'a [InstanceId],
    ) -> BoxFuture<'a, FleetResult<Vec<InstanceDescription>>>;

    /// Request a new target capacity. `Ok(false)` means the provider
    /// refused the change.
    fn modify_capacity(&self, fleet_id: &str, target_capacity: u32) -> BoxFuture<'_, FleetResult<bool>>;

    fn terminate_instances<'a>(&'a self, instance_ids: &'a [InstanceId]) -> BoxFuture<'a, FleetResult<()>>;

    fn tag_resources<'a>(
        &'a self,
        instance_ids: &'a [InstanceId],
        key: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, FleetResult<()>>;

    /// Cancel the fleet request. Returns the ids of requests that were
    /// cancelled; empty means the cancellation did not take.
    fn cancel_fleet(&self, fleet_id: &str, terminate_instances: bool) -> BoxFuture<'_, FleetResult<Vec<String>>>;
}

/// Read access to the build queue.
pub trait BuildQueue: Send + Sync {
    /// Queued builds with the time each started waiting.
    fn queued_items(&self) -> BoxFuture<'_, ServerResult<Vec<QueuedItem>>>;
}

/// The build server's registry of non-elastic agents.
pub trait AgentRegistry: Send + Sync {
    fn list_agents(&self) -> BoxFuture<'_, ServerResult<Vec<AgentRecord>>>;

    /// Remove an agent. May fail with [`crate::BuildServerError::Timeout`].
    fn remove_agent(&self, agent_id: AgentId) -> BoxFuture<'_, ServerResult<()>>;

    /// Whether `extra_agents` more remote agents fit within the license.
    fn allows_new_agents(&self, extra_agents: u32) -> bool;
}

/// Builds currently executing on agents.
pub trait ExecutionTracker: Send + Sync {
    fn executing(&self) -> BoxFuture<'_, ServerResult<Vec<RunningBuild>>>;

    /// Mark a build finished so it no longer references its agent.
    fn abort(&self, result_key: &ResultKey) -> BoxFuture<'_, ServerResult<()>>;
}
