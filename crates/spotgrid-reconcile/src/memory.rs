//! In-memory collaborators.
//!
//! `MemoryFleet` and `MemoryBuildServer` implement every collaborator trait
//! over a serializable [`World`]. Operations can be made to fail, agent
//! removals can be made to time out, and every mutating call is appended to
//! a journal so tests can check ordering.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use spotgrid_core::{
    AgentId, AgentRecord, FleetDescription, InstanceDescription, InstanceId, QueuedItem,
    ResultKey, RunningBuild,
};

use crate::error::{BuildServerError, FleetApiError, FleetResult, ServerResult};
use crate::ports::{AgentRegistry, BoxFuture, BuildQueue, ExecutionTracker, FleetApi};

/// Fleet and build server state, as loaded from or saved to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub fleet: FleetWorld,
    #[serde(default)]
    pub server: ServerWorld,
}

impl World {
    pub fn new(fleet_id: &str) -> Self {
        Self {
            fleet: FleetWorld::new(fleet_id),
            server: ServerWorld::default(),
        }
    }
}

// ── Fleet ──────────────────────────────────────────────────────────

/// Fleet provider operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetOp {
    Describe,
    DescribeInstances,
    Modify,
    Terminate,
    Tag,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInstance {
    pub instance_id: InstanceId,
    pub private_dns_name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetWorld {
    pub fleet_id: String,
    pub target_capacity: u32,
    #[serde(default = "active_state")]
    pub state: String,
    #[serde(default)]
    pub instances: Vec<MemoryInstance>,
    /// Operations that fail with the given error on every call.
    #[serde(default)]
    pub failures: BTreeMap<FleetOp, FleetApiError>,
    /// Make `modify_capacity` answer `false`.
    #[serde(default)]
    pub reject_modify: bool,
}

fn active_state() -> String {
    "active".to_string()
}

impl FleetWorld {
    pub fn new(fleet_id: &str) -> Self {
        Self {
            fleet_id: fleet_id.to_string(),
            target_capacity: 0,
            state: active_state(),
            instances: Vec::new(),
            failures: BTreeMap::new(),
            reject_modify: false,
        }
    }

    pub fn add_instance(&mut self, instance_id: &str, private_dns_name: &str) {
        self.instances.push(MemoryInstance {
            instance_id: instance_id.to_string(),
            private_dns_name: private_dns_name.to_string(),
            tags: BTreeMap::new(),
        });
    }

    fn check(&self, op: FleetOp) -> FleetResult<()> {
        match self.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn check_fleet(&self, op: FleetOp, fleet_id: &str) -> FleetResult<()> {
        self.check(op)?;
        if fleet_id != self.fleet_id {
            return Err(FleetApiError::NotFound(fleet_id.to_string()));
        }
        Ok(())
    }
}

/// In-memory fleet provider.
#[derive(Debug)]
pub struct MemoryFleet {
    world: Mutex<FleetWorld>,
    journal: Mutex<Vec<String>>,
}

impl MemoryFleet {
    pub fn new(world: FleetWorld) -> Self {
        Self {
            world: Mutex::new(world),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Current state of the fleet.
    pub async fn snapshot(&self) -> FleetWorld {
        self.world.lock().await.clone()
    }

    /// Calls made so far, oldest first.
    pub async fn journal(&self) -> Vec<String> {
        self.journal.lock().await.clone()
    }

    async fn record(&self, entry: String) {
        self.journal.lock().await.push(entry);
    }
}

impl FleetApi for MemoryFleet {
    fn describe_fleet(&self, fleet_id: &str) -> BoxFuture<'_, FleetResult<FleetDescription>> {
        let fleet_id = fleet_id.to_string();
        Box::pin(async move {
            let world = self.world.lock().await;
            world.check_fleet(FleetOp::Describe, &fleet_id)?;
            Ok(FleetDescription {
                target_capacity: world.target_capacity,
                state: world.state.clone(),
            })
        })
    }

    fn describe_fleet_instances(&self, fleet_id: &str) -> BoxFuture<'_, FleetResult<Vec<InstanceId>>> {
        let fleet_id = fleet_id.to_string();
        Box::pin(async move {
            let world = self.world.lock().await;
            world.check_fleet(FleetOp::Describe, &fleet_id)?;
            Ok(world.instances.iter().map(|i| i.instance_id.clone()).collect())
        })
    }

    fn describe_instances<'a>(
        &'a self,
        instance_ids: &'a [InstanceId],
    ) -> BoxFuture<'a, FleetResult<Vec<InstanceDescription>>> {
        Box::pin(async move {
            let world = self.world.lock().await;
            world.check(FleetOp::DescribeInstances)?;
            self.record(format!("describe_instances {}", instance_ids.join(","))).await;
            Ok(world
                .instances
                .iter()
                .filter(|i| instance_ids.contains(&i.instance_id))
                .map(|i| InstanceDescription {
                    instance_id: i.instance_id.clone(),
                    private_dns_name: i.private_dns_name.clone(),
                })
                .collect())
        })
    }

    fn modify_capacity(&self, fleet_id: &str, target_capacity: u32) -> BoxFuture<'_, FleetResult<bool>> {
        let fleet_id = fleet_id.to_string();
        Box::pin(async move {
            let mut world = self.world.lock().await;
            world.check_fleet(FleetOp::Modify, &fleet_id)?;
            self.record(format!("modify {target_capacity}")).await;
            if world.reject_modify {
                return Ok(false);
            }
            world.target_capacity = target_capacity;
            Ok(true)
        })
    }

    fn terminate_instances<'a>(&'a self, instance_ids: &'a [InstanceId]) -> BoxFuture<'a, FleetResult<()>> {
        Box::pin(async move {
            let mut world = self.world.lock().await;
            world.check(FleetOp::Terminate)?;
            self.record(format!("terminate {}", instance_ids.join(","))).await;
            world.instances.retain(|i| !instance_ids.contains(&i.instance_id));
            Ok(())
        })
    }

    fn tag_resources<'a>(
        &'a self,
        instance_ids: &'a [InstanceId],
        key: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, FleetResult<()>> {
        Box::pin(async move {
            let mut world = self.world.lock().await;
            world.check(FleetOp::Tag)?;
            self.record(format!("tag {} {key}", instance_ids.join(","))).await;
            for instance in world
                .instances
                .iter_mut()
                .filter(|i| instance_ids.contains(&i.instance_id))
            {
                instance.tags.insert(key.to_string(), value.to_string());
            }
            Ok(())
        })
    }

    fn cancel_fleet(&self, fleet_id: &str, terminate_instances: bool) -> BoxFuture<'_, FleetResult<Vec<String>>> {
        let fleet_id = fleet_id.to_string();
        Box::pin(async move {
            let mut world = self.world.lock().await;
            world.check_fleet(FleetOp::Cancel, &fleet_id)?;
            self.record(format!("cancel {fleet_id}")).await;
            if terminate_instances {
                world.instances.clear();
                world.state = "cancelled_terminating".to_string();
            } else {
                world.state = "cancelled_running".to_string();
            }
            Ok(vec![fleet_id])
        })
    }
}

// ── Build server ───────────────────────────────────────────────────

/// Build server operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerOp {
    Queue,
    ListAgents,
    Executing,
    Abort,
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerWorld {
    #[serde(default)]
    pub queue: Vec<QueuedItem>,
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    #[serde(default)]
    pub running: Vec<RunningBuild>,
    /// Most extra remote agents the license admits; `None` is unlimited.
    #[serde(default)]
    pub license_limit: Option<u32>,
    /// Agents whose removal times out.
    #[serde(default)]
    pub removal_timeouts: BTreeSet<AgentId>,
    /// Operations that fail as unavailable on every call.
    #[serde(default)]
    pub failures: BTreeMap<ServerOp, String>,
}

impl ServerWorld {
    pub fn add_agent(&mut self, id: AgentId, name: &str, busy: bool) {
        self.agents.push(AgentRecord {
            id,
            name: name.to_string(),
            busy,
        });
    }

    pub fn add_running(&mut self, result_key: &str, agent_id: AgentId) {
        self.running.push(RunningBuild {
            result_key: result_key.to_string(),
            agent_id,
        });
    }

    fn check(&self, op: ServerOp) -> ServerResult<()> {
        match self.failures.get(&op) {
            Some(reason) => Err(BuildServerError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

/// In-memory build server: queue, agent registry, and execution tracker.
#[derive(Debug)]
pub struct MemoryBuildServer {
    world: Mutex<ServerWorld>,
    license_limit: Option<u32>,
    journal: Mutex<Vec<String>>,
}

impl MemoryBuildServer {
    pub fn new(world: ServerWorld) -> Self {
        Self {
            license_limit: world.license_limit,
            world: Mutex::new(world),
            journal: Mutex::new(Vec::new()),
        }
    }

    pub async fn snapshot(&self) -> ServerWorld {
        self.world.lock().await.clone()
    }

    pub async fn journal(&self) -> Vec<String> {
        self.journal.lock().await.clone()
    }

    async fn record(&self, entry: String) {
        self.journal.lock().await.push(entry);
    }
}

impl BuildQueue for MemoryBuildServer {
    fn queued_items(&self) -> BoxFuture<'_, ServerResult<Vec<QueuedItem>>> {
        Box::pin(async move {
            let world = self.world.lock().await;
            world.check(ServerOp::Queue)?;
            Ok(world.queue.clone())
        })
    }
}

impl AgentRegistry for MemoryBuildServer {
    fn list_agents(&self) -> BoxFuture<'_, ServerResult<Vec<AgentRecord>>> {
        Box::pin(async move {
            let world = self.world.lock().await;
            world.check(ServerOp::ListAgents)?;
            Ok(world.agents.clone())
        })
    }

    fn remove_agent(&self, agent_id: AgentId) -> BoxFuture<'_, ServerResult<()>> {
        Box::pin(async move {
            let mut world = self.world.lock().await;
            world.check(ServerOp::Remove)?;
            if world.removal_timeouts.contains(&agent_id) {
                self.record(format!("remove_timeout {agent_id}")).await;
                return Err(BuildServerError::Timeout { agent_id });
            }
            self.record(format!("remove {agent_id}")).await;
            world.agents.retain(|a| a.id != agent_id);
            Ok(())
        })
    }

    fn allows_new_agents(&self, extra_agents: u32) -> bool {
        self.license_limit.is_none_or(|limit| extra_agents <= limit)
    }
}

impl ExecutionTracker for MemoryBuildServer {
    fn executing(&self) -> BoxFuture<'_, ServerResult<Vec<RunningBuild>>> {
        Box::pin(async move {
            let world = self.world.lock().await;
            world.check(ServerOp::Executing)?;
            Ok(world.running.clone())
        })
    }

    fn abort(&self, result_key: &ResultKey) -> BoxFuture<'_, ServerResult<()>> {
        let result_key = result_key.clone();
        Box::pin(async move {
            let mut world = self.world.lock().await;
            world.check(ServerOp::Abort)?;
            self.record(format!("abort {result_key}")).await;
            world.running.retain(|b| b.result_key != result_key);
            Ok(())
        })
    }
}
