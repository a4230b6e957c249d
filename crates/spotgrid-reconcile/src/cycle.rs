//! Cycle orchestrator.
//!
//! Runs gather, decide, apply, reconcile, and cancel in order. Every phase
//! ends in a [`PhaseStatus`]; a failed phase never stops a later one unless
//! the later one needs data the failed phase did not produce.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use spotgrid_autoscale::{DecisionInput, DecisionReason, Direction, ScalingDecision, decide};
use spotgrid_core::{AgentRecord, CycleSettings, FleetState, InstanceId, QueueSnapshot};

use crate::agents::{AgentPoolReconciler, TeardownSummary};
use crate::error::{ErrorClass, FleetApiError};
use crate::fleet::FleetReconciler;
use crate::memory::{MemoryBuildServer, MemoryFleet};
use crate::ports::{AgentRegistry, BuildQueue, ExecutionTracker, FleetApi};
use crate::telemetry;

/// Phases of one cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Gather,
    Decide,
    Terminate,
    ApplyCapacity,
    Tag,
    ReconcileAgents,
    CancelFleet,
}

/// Outcome of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseStatus {
    Succeeded { detail: String },
    Skipped { reason: String },
    Failed { class: ErrorClass, reason: String },
}

impl PhaseStatus {
    pub fn succeeded(detail: impl Into<String>) -> Self {
        Self::Succeeded {
            detail: detail.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(class: ErrorClass, reason: impl Into<String>) -> Self {
        Self::Failed {
            class,
            reason: reason.into(),
        }
    }

    pub fn from_fleet_error(err: &FleetApiError) -> Self {
        Self::failed(err.class(), err.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    #[serde(flatten)]
    pub status: PhaseStatus,
}

/// The decision as it appears in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionSummary {
    pub direction: Direction,
    pub reason: DecisionReason,
    pub previous_capacity: u32,
    pub new_capacity: u32,
    pub terminate: Vec<InstanceId>,
}

impl From<&ScalingDecision> for DecisionSummary {
    fn from(decision: &ScalingDecision) -> Self {
        Self {
            direction: decision.direction(),
            reason: decision.reason(),
            previous_capacity: decision.previous_capacity(),
            new_capacity: decision.new_capacity(),
            terminate: decision.terminations().instance_ids.clone(),
        }
    }
}

/// Everything one cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fleet_id: String,
    pub started_at_ms: u64,
    pub decision: Option<DecisionSummary>,
    pub phases: Vec<PhaseReport>,
    pub teardown: Option<TeardownSummary>,
}

impl CycleReport {
    fn new(fleet_id: &str, started_at_ms: u64) -> Self {
        Self {
            fleet_id: fleet_id.to_string(),
            started_at_ms,
            decision: None,
            phases: Vec::new(),
            teardown: None,
        }
    }

    fn record(&mut self, phase: Phase, status: PhaseStatus) {
        self.phases.push(PhaseReport { phase, status });
    }

    pub fn status(&self, phase: Phase) -> Option<&PhaseStatus> {
        self.phases.iter().find(|p| p.phase == phase).map(|p| &p.status)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PhaseReport> {
        self.phases.iter().filter(|p| p.status.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// External systems a cycle talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub fleet: Arc<dyn FleetApi>,
    pub queue: Arc<dyn BuildQueue>,
    pub agents: Arc<dyn AgentRegistry>,
    pub executions: Arc<dyn ExecutionTracker>,
}

impl Collaborators {
    /// Wire a cycle to the in-memory fleet and build server.
    pub fn in_memory(fleet: Arc<MemoryFleet>, server: Arc<MemoryBuildServer>) -> Self {
        Self {
            fleet,
            queue: server.clone(),
            agents: server.clone(),
            executions: server,
        }
    }
}

/// What the gather phase managed to read.
#[derive(Default)]
struct Telemetry {
    fleet: Option<FleetState>,
    queue: Option<QueueSnapshot>,
    agents: Option<Vec<AgentRecord>>,
    fleet_agent_count: u32,
}

pub struct CycleRunner {
    settings: CycleSettings,
    collaborators: Collaborators,
    fleet: FleetReconciler,
    pool: AgentPoolReconciler,
}

impl CycleRunner {
    pub fn new(settings: CycleSettings, collaborators: Collaborators) -> Self {
        let fleet = FleetReconciler::new(collaborators.fleet.clone(), &settings.fleet_id);
        let pool = AgentPoolReconciler::new(
            collaborators.agents.clone(),
            collaborators.executions.clone(),
            settings.ownership.clone(),
            settings.teardown_concurrency,
        );
        Self {
            settings,
            collaborators,
            fleet,
            pool,
        }
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Run one decision cycle as of `now_ms`.
    pub async fn run_cycle(&self, now_ms: u64) -> CycleReport {
        let mut report = CycleReport::new(&self.settings.fleet_id, now_ms);
        info!(fleet = %self.settings.fleet_id, "cycle started");

        let (mut telemetry, gather_status) = self.gather(now_ms).await;
        report.record(Phase::Gather, gather_status);

        let decision = self.decide(&telemetry, &mut report);

        // Terminate, modify, tag. The instance map loses retired instances
        // only once termination went through.
        match (&decision, telemetry.fleet.as_mut()) {
            (Some(decision), Some(fleet)) => {
                let plan = decision.terminations();
                let status = self.fleet.terminate_instances(&plan.instance_ids).await;
                if status.is_success() {
                    fleet.instances.retire(&plan.join_keys);
                }
                let terminate_failed = status.is_failure();
                report.record(Phase::Terminate, status);

                // A lowered target with the chosen instances still running
                // lets the provider pick which ones go, busy ones included.
                let status = if terminate_failed {
                    warn!(fleet = %self.settings.fleet_id, "termination failed; capacity left unchanged");
                    PhaseStatus::skipped("termination failed")
                } else {
                    self.fleet
                        .apply_capacity(decision.previous_capacity(), decision.new_capacity())
                        .await
                };
                report.record(Phase::ApplyCapacity, status);
            }
            _ => {
                report.record(Phase::Terminate, PhaseStatus::skipped("no scaling decision"));
                report.record(Phase::ApplyCapacity, PhaseStatus::skipped("no scaling decision"));
            }
        }

        let status = match &telemetry.fleet {
            Some(fleet) => {
                self.fleet
                    .tag_active_instances(&fleet.instances.instance_ids())
                    .await
            }
            None => PhaseStatus::skipped("fleet state unavailable"),
        };
        report.record(Phase::Tag, status);

        let status = match (&telemetry.fleet, &telemetry.agents) {
            (Some(fleet), Some(agents)) => match self.pool.reconcile(agents, &fleet.instances).await {
                Ok(summary) => {
                    let status = PhaseStatus::succeeded(format!(
                        "removed {} agent(s), aborted {} build(s), {} orphaned build(s), {} left for next cycle",
                        summary.removed.len(),
                        summary.aborted.len(),
                        summary.orphaned.len(),
                        summary.failed.len()
                    ));
                    report.teardown = Some(summary);
                    status
                }
                Err(e) => {
                    error!(error = %e, "could not list running builds; no agents removed");
                    PhaseStatus::failed(e.class(), e.to_string())
                }
            },
            (None, _) => PhaseStatus::skipped("fleet state unavailable"),
            (_, None) => PhaseStatus::skipped("agent list unavailable"),
        };
        report.record(Phase::ReconcileAgents, status);

        let status = if self.settings.terminate_fleet_when_idle {
            self.fleet
                .cancel_fleet_if_idle(self.collaborators.queue.as_ref())
                .await
        } else {
            PhaseStatus::skipped("fleet cancellation not requested")
        };
        report.record(Phase::CancelFleet, status);

        if report.has_failures() {
            warn!(
                fleet = %self.settings.fleet_id,
                failed = report.failures().count(),
                "cycle finished with failed phases"
            );
        } else {
            info!(fleet = %self.settings.fleet_id, "cycle finished");
        }
        report
    }

    async fn gather(&self, now_ms: u64) -> (Telemetry, PhaseStatus) {
        let mut gathered = Telemetry::default();
        let mut problems = Vec::new();
        let mut class = None;

        match telemetry::read_fleet(self.collaborators.fleet.as_ref(), &self.settings.fleet_id).await {
            Ok(state) => gathered.fleet = Some(state),
            Err(e) => {
                error!(fleet = %self.settings.fleet_id, error = %e, "could not read fleet state");
                class = class.or(Some(e.class()));
                problems.push(format!("fleet: {e}"));
            }
        }

        match telemetry::read_queue(self.collaborators.queue.as_ref(), now_ms).await {
            Ok(queue) => gathered.queue = Some(queue),
            Err(e) => {
                error!(error = %e, "could not read build queue");
                class = class.or(Some(e.class()));
                problems.push(format!("queue: {e}"));
            }
        }

        match self.collaborators.agents.list_agents().await {
            Ok(agents) => gathered.agents = Some(agents),
            Err(e) => {
                error!(error = %e, "could not list agents");
                class = class.or(Some(e.class()));
                problems.push(format!("agents: {e}"));
            }
        }

        if let Some(fleet) = gathered.fleet.as_mut()
            && let Some(agents) = &gathered.agents
        {
            gathered.fleet_agent_count = telemetry::classify_agents(&mut fleet.instances, agents);
        }

        let status = match class {
            Some(class) => PhaseStatus::failed(class, problems.join("; ")),
            None => {
                let fleet = gathered.fleet.as_ref();
                PhaseStatus::succeeded(format!(
                    "{} instance(s), {} queued, {} fleet agent(s)",
                    fleet.map_or(0, |f| f.instances.len()),
                    gathered.queue.as_ref().map_or(0, |q| q.queued),
                    gathered.fleet_agent_count
                ))
            }
        };
        (gathered, status)
    }

    fn decide(&self, telemetry: &Telemetry, report: &mut CycleReport) -> Option<ScalingDecision> {
        if !self.settings.thresholds.enabled {
            warn!(fleet = %self.settings.fleet_id, "autoscaling disabled");
            report.record(Phase::Decide, PhaseStatus::skipped("autoscaling disabled"));
            return None;
        }

        // Without the agent list every instance would look idle.
        let (Some(fleet), Some(queue), Some(_)) =
            (&telemetry.fleet, &telemetry.queue, &telemetry.agents)
        else {
            report.record(Phase::Decide, PhaseStatus::skipped("telemetry incomplete"));
            return None;
        };

        let input = DecisionInput {
            target_capacity: fleet.target_capacity,
            active_capacity: fleet.active_capacity,
            thresholds: &self.settings.thresholds,
            queue,
            instances: &fleet.instances,
            fleet_agent_count: telemetry.fleet_agent_count,
        };
        let registry = &self.collaborators.agents;
        let decision = decide(&input, |extra| registry.allows_new_agents(extra));

        let summary = DecisionSummary::from(&decision);
        info!(
            fleet = %self.settings.fleet_id,
            direction = ?summary.direction,
            reason = ?summary.reason,
            from = summary.previous_capacity,
            to = summary.new_capacity,
            "scaling decision"
        );
        report.record(
            Phase::Decide,
            PhaseStatus::succeeded(format!(
                "{:?}: {} -> {}",
                summary.reason, summary.previous_capacity, summary.new_capacity
            )),
        );
        report.decision = Some(summary);
        Some(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FleetOp, ServerOp, World};
    use spotgrid_core::{FileConfig, QueuedItem};

    fn settings(enabled: bool) -> CycleSettings {
        let mut config = FileConfig::scaffold("sfr-1", "us-east-1");
        config.autoscaling.enabled = enabled;
        config.validate().unwrap()
    }

    fn runner(world: World, settings: CycleSettings) -> (CycleRunner, Arc<MemoryFleet>, Arc<MemoryBuildServer>) {
        let fleet = Arc::new(MemoryFleet::new(world.fleet));
        let server = Arc::new(MemoryBuildServer::new(world.server));
        let runner = CycleRunner::new(
            settings,
            Collaborators::in_memory(fleet.clone(), server.clone()),
        );
        (runner, fleet, server)
    }

    fn world_with_instances(count: u32) -> World {
        let mut world = World::new("sfr-1");
        world.fleet.target_capacity = count;
        for i in 1..=count {
            let name = format!("ip-10-0-0-{i}.ec2.internal");
            world.fleet.add_instance(&format!("i-{i}"), &name);
            world.server.add_agent(u64::from(i), &name, true);
        }
        world
    }

    #[test]
    fn phase_status_serializes_tagged() {
        let report = PhaseReport {
            phase: Phase::ApplyCapacity,
            status: PhaseStatus::failed(ErrorClass::Authorization, "denied"),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["phase"], "apply_capacity");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["class"], "authorization");
    }

    #[tokio::test]
    async fn disabled_autoscaling_skips_decision() {
        let mut world = world_with_instances(2);
        world.server.queue.push(QueuedItem {
            result_key: "P-1".to_string(),
            started_at_ms: 0,
        });
        let (runner, fleet, _) = runner(world, settings(false));

        let report = runner.run_cycle(3_600_000).await;
        assert!(report.decision.is_none());
        assert!(report.status(Phase::Decide).unwrap().is_skipped());
        assert!(!fleet.journal().await.iter().any(|e| e.starts_with("modify")));
    }

    #[tokio::test]
    async fn every_phase_reported_in_order() {
        let (runner, _, _) = runner(world_with_instances(1), settings(true));
        let report = runner.run_cycle(0).await;
        let phases: Vec<_> = report.phases.iter().map(|p| p.phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::Gather,
                Phase::Decide,
                Phase::Terminate,
                Phase::ApplyCapacity,
                Phase::Tag,
                Phase::ReconcileAgents,
                Phase::CancelFleet,
            ]
        );
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn fleet_read_failure_degrades_to_no_removals() {
        let mut world = world_with_instances(2);
        world.server.add_agent(99, "ip-gone.ec2.internal", false);
        world
            .fleet
            .failures
            .insert(FleetOp::Describe, FleetApiError::NotFound("sfr-1".to_string()));
        let (runner, _, server) = runner(world, settings(true));

        let report = runner.run_cycle(0).await;
        assert!(report.status(Phase::Gather).unwrap().is_failure());
        assert!(report.status(Phase::ReconcileAgents).unwrap().is_skipped());
        assert!(server.journal().await.is_empty());
    }

    #[tokio::test]
    async fn agent_list_failure_skips_decision() {
        let mut world = world_with_instances(3);
        world.server.failures.insert(ServerOp::ListAgents, "down".to_string());
        let (runner, fleet, _) = runner(world, settings(true));

        let report = runner.run_cycle(0).await;
        assert!(report.decision.is_none());
        assert!(!fleet.journal().await.iter().any(|e| e.starts_with("terminate")));
        // Tagging does not depend on agents.
        assert!(report.status(Phase::Tag).unwrap().is_success());
    }

    #[tokio::test]
    async fn failed_termination_keeps_instances_live() {
        let mut world = world_with_instances(4);
        world.server.agents.iter_mut().for_each(|a| a.busy = false);
        world.fleet.failures.insert(
            FleetOp::Terminate,
            FleetApiError::Unauthorized("ec2:TerminateInstances".to_string()),
        );
        let (runner, fleet, server) = runner(world, settings(true));

        let report = runner.run_cycle(0).await;
        assert!(report.status(Phase::Terminate).unwrap().is_failure());
        assert_eq!(
            report.status(Phase::ApplyCapacity),
            Some(&PhaseStatus::skipped("termination failed"))
        );
        assert!(!fleet.journal().await.iter().any(|e| e.starts_with("modify")));
        assert_eq!(fleet.snapshot().await.target_capacity, 4);
        // Retired instances are only dropped after termination succeeds,
        // so no agent became stale.
        assert!(!server.journal().await.iter().any(|e| e.starts_with("remove")));
    }
}
