//! Agent pool reconciler.
//!
//! Removes fleet-owned agents whose backing instance is gone. Work bound to
//! an agent is aborted before the agent is removed. Agents outside the
//! ownership pattern are never touched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use spotgrid_core::{AgentId, AgentRecord, FleetOwnership, InstanceMap, ResultKey};

use crate::error::{BuildServerError, ServerResult};
use crate::ports::{AgentRegistry, ExecutionTracker};

/// What one teardown pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownSummary {
    /// Agents removed from the registry.
    pub removed: Vec<AgentId>,
    /// Builds aborted ahead of a removal.
    pub aborted: Vec<ResultKey>,
    /// Stale agents left in place; they are retried next cycle.
    pub failed: Vec<AgentId>,
    /// Builds aborted because their agent is no longer registered.
    pub orphaned: Vec<ResultKey>,
    /// Agents outside the ownership pattern.
    pub foreign_retained: usize,
}

/// Agents split by ownership and liveness.
#[derive(Debug, Default)]
pub struct AgentPlan<'a> {
    pub stale: Vec<&'a AgentRecord>,
    pub live: usize,
    pub foreign: usize,
}

struct Teardown {
    agent_id: AgentId,
    aborted: Vec<ResultKey>,
    removed: bool,
}

pub struct AgentPoolReconciler {
    registry: Arc<dyn AgentRegistry>,
    executions: Arc<dyn ExecutionTracker>,
    ownership: FleetOwnership,
    concurrency: usize,
}

impl AgentPoolReconciler {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        executions: Arc<dyn ExecutionTracker>,
        ownership: FleetOwnership,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            executions,
            ownership,
            concurrency: concurrency.max(1),
        }
    }

    /// Classify agents against the live instance map.
    pub fn plan<'a>(&self, agents: &'a [AgentRecord], instances: &InstanceMap) -> AgentPlan<'a> {
        let mut plan = AgentPlan::default();
        for agent in agents {
            let key = agent.join_key();
            if !self.ownership.owns(&key) {
                plan.foreign += 1;
            } else if instances.contains(&key) {
                plan.live += 1;
            } else {
                plan.stale.push(agent);
            }
        }
        plan
    }

    /// Tear down every stale fleet-owned agent, then abort builds whose
    /// agent is no longer registered.
    ///
    /// Fails only when running builds cannot be listed while stale agents
    /// exist, in which case no agent is removed.
    pub async fn reconcile(
        &self,
        agents: &[AgentRecord],
        instances: &InstanceMap,
    ) -> ServerResult<TeardownSummary> {
        let plan = self.plan(agents, instances);
        debug!(
            stale = plan.stale.len(),
            live = plan.live,
            foreign = plan.foreign,
            "agent pool classified"
        );

        let mut summary = TeardownSummary {
            foreign_retained: plan.foreign,
            ..TeardownSummary::default()
        };

        let running = match self.executions.executing().await {
            Ok(running) => running,
            Err(e) if plan.stale.is_empty() => {
                warn!(error = %e, "could not list running builds; orphan sweep skipped");
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };

        let registered: BTreeSet<AgentId> = agents.iter().map(|a| a.id).collect();
        let mut bound: BTreeMap<AgentId, Vec<ResultKey>> = BTreeMap::new();
        let mut orphans = Vec::new();
        for build in running {
            if registered.contains(&build.agent_id) {
                bound.entry(build.agent_id).or_default().push(build.result_key);
            } else {
                orphans.push(build);
            }
        }

        let outcomes: Vec<Teardown> = stream::iter(plan.stale.into_iter().map(|agent| {
            let builds = bound.remove(&agent.id).unwrap_or_default();
            self.tear_down(agent, builds)
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        for outcome in outcomes {
            summary.aborted.extend(outcome.aborted);
            if outcome.removed {
                summary.removed.push(outcome.agent_id);
            } else {
                summary.failed.push(outcome.agent_id);
            }
        }

        for build in orphans {
            match self.executions.abort(&build.result_key).await {
                Ok(()) => {
                    info!(build = %build.result_key, agent = build.agent_id, "aborted build of unregistered agent");
                    summary.orphaned.push(build.result_key);
                }
                Err(e) => {
                    error!(build = %build.result_key, agent = build.agent_id, error = %e, "failed to abort orphaned build");
                }
            }
        }

        summary.removed.sort_unstable();
        summary.failed.sort_unstable();
        summary.aborted.sort();
        summary.orphaned.sort();

        Ok(summary)
    }

    async fn tear_down(&self, agent: &AgentRecord, builds: Vec<ResultKey>) -> Teardown {
        let mut teardown = Teardown {
            agent_id: agent.id,
            aborted: Vec::with_capacity(builds.len()),
            removed: false,
        };

        for key in builds {
            if let Err(e) = self.executions.abort(&key).await {
                error!(agent = %agent.name, build = %key, error = %e, "failed to abort build; agent kept");
                return teardown;
            }
            info!(agent = %agent.name, build = %key, "aborted build on stale agent");
            teardown.aborted.push(key);
        }

        match self.registry.remove_agent(agent.id).await {
            Ok(()) => {
                info!(agent = %agent.name, id = agent.id, "removed stale agent");
                teardown.removed = true;
            }
            Err(BuildServerError::Timeout { agent_id }) => {
                warn!(agent = %agent.name, id = agent_id, "agent removal timed out; retried next cycle");
            }
            Err(e) => {
                error!(agent = %agent.name, id = agent.id, error = %e, "agent removal failed");
            }
        }
        teardown
    }
}
