//! Full-cycle tests.
//!
//! Every cycle runs against `MemoryFleet` and `MemoryBuildServer`; the call
//! journals are used to check what reached the outside world and in which
//! order.

use std::sync::Arc;

use spotgrid_autoscale::{DecisionReason, Direction};
use spotgrid_core::{CycleSettings, FLEET_MARKER_TAG_KEY, FileConfig, QueuedItem};
use spotgrid_reconcile::memory::FleetOp;
use spotgrid_reconcile::*;

const MINUTE: u64 = 60_000;

fn settings(max_queued: i64, max_wait: i64, max_idle: i64, units: i64) -> CycleSettings {
    let mut config = FileConfig::scaffold("sfr-it", "us-east-1 (N. Virginia)");
    config.autoscaling.max_queued_builds = Some(max_queued);
    config.autoscaling.max_average_queue_minutes = Some(max_wait);
    config.autoscaling.max_idle_instances = Some(max_idle);
    config.autoscaling.max_units_per_scale = Some(units);
    config.validate().unwrap()
}

struct Harness {
    runner: CycleRunner,
    fleet: Arc<MemoryFleet>,
    server: Arc<MemoryBuildServer>,
}

impl Harness {
    fn new(world: World, settings: CycleSettings) -> Self {
        let fleet = Arc::new(MemoryFleet::new(world.fleet));
        let server = Arc::new(MemoryBuildServer::new(world.server));
        let runner = CycleRunner::new(
            settings,
            Collaborators::in_memory(fleet.clone(), server.clone()),
        );
        Self {
            runner,
            fleet,
            server,
        }
    }

    async fn world(&self) -> World {
        World {
            fleet: self.fleet.snapshot().await,
            server: self.server.snapshot().await,
        }
    }
}

fn dns(i: u32) -> String {
    format!("ip-10-0-0-{i}.ec2.internal")
}

/// `count` instances with two agents each; instances in `busy` have one
/// busy agent.
fn fleet_of(count: u32, busy: &[u32]) -> World {
    let mut world = World::new("sfr-it");
    world.fleet.target_capacity = count;
    let mut agent_id = 0;
    for i in 1..=count {
        world.fleet.add_instance(&format!("i-{i}"), &dns(i));
        agent_id += 1;
        world.server.add_agent(agent_id, &dns(i), busy.contains(&i));
        agent_id += 1;
        world
            .server
            .add_agent(agent_id, &format!("{} (2)", dns(i)), false);
    }
    world
}

fn queued(started_minutes_ago: &[u64], now_ms: u64) -> Vec<QueuedItem> {
    started_minutes_ago
        .iter()
        .enumerate()
        .map(|(n, ago)| QueuedItem {
            result_key: format!("PROJ-PLAN-{n}"),
            started_at_ms: now_ms - ago * MINUTE,
        })
        .collect()
}

#[tokio::test]
async fn idle_excess_terminates_two_and_removes_their_agents() {
    // 10 agents over 5 instances, 3 instances fully idle.
    let world = fleet_of(5, &[1, 2]);
    let h = Harness::new(world, settings(3, 5, 2, 2));

    let report = h.runner.run_cycle(0).await;
    let decision = report.decision.as_ref().unwrap();
    assert_eq!(decision.direction, Direction::ScaleDown);
    assert_eq!(decision.reason, DecisionReason::IdleExcess);
    assert_eq!(decision.new_capacity, 3);
    assert_eq!(decision.terminate, vec!["i-3".to_string(), "i-4".to_string()]);

    let fleet_calls = h.fleet.journal().await;
    let terminate = fleet_calls.iter().position(|e| e == "terminate i-3,i-4").unwrap();
    let modify = fleet_calls.iter().position(|e| e == "modify 3").unwrap();
    assert!(terminate < modify);
    assert!(fleet_calls.iter().any(|e| e == &format!("tag i-1,i-2,i-5 {FLEET_MARKER_TAG_KEY}")));

    let teardown = report.teardown.as_ref().unwrap();
    assert_eq!(teardown.removed, vec![5, 6, 7, 8]);
    let world = h.world().await;
    assert_eq!(world.server.agents.len(), 6);
    assert_eq!(world.fleet.target_capacity, 3);
}

#[tokio::test]
async fn average_wait_drives_scale_up() {
    let now = 60 * MINUTE;

    // Waits of 1 and 7 minutes average to 4: below the threshold.
    let mut world = fleet_of(5, &[1, 2, 3, 4, 5]);
    world.server.queue = queued(&[1, 7], now);
    let h = Harness::new(world, settings(3, 5, 2, 2));
    let report = h.runner.run_cycle(now).await;
    assert_eq!(report.decision.as_ref().unwrap().direction, Direction::NoOp);
    assert!(report.status(Phase::ApplyCapacity).unwrap().is_skipped());
    assert!(!h.fleet.journal().await.iter().any(|e| e.starts_with("modify")));

    // A third item waiting 10 minutes lifts the average to 6.
    let mut world = fleet_of(5, &[1, 2, 3, 4, 5]);
    world.server.queue = queued(&[1, 7, 10], now);
    let h = Harness::new(world, settings(3, 5, 2, 2));
    let report = h.runner.run_cycle(now).await;
    let decision = report.decision.as_ref().unwrap();
    assert_eq!(decision.direction, Direction::ScaleUp);
    assert_eq!(decision.reason, DecisionReason::QueueWait);
    assert_eq!(decision.new_capacity, 7);
    assert_eq!(h.fleet.snapshot().await.target_capacity, 7);
}

#[tokio::test]
async fn lagging_active_capacity_holds_target() {
    let now = 30 * MINUTE;
    let mut world = fleet_of(5, &[1, 2, 3, 4, 5]);
    world.fleet.target_capacity = 8;
    world.server.queue = queued(&[1, 1, 1, 1], now);
    let h = Harness::new(world, settings(3, 5, 2, 2));

    let report = h.runner.run_cycle(now).await;
    assert_eq!(report.decision.as_ref().unwrap().new_capacity, 8);
    assert!(!h.fleet.journal().await.iter().any(|e| e.starts_with("modify")));
}

#[tokio::test]
async fn license_limits_growth() {
    let now = 30 * MINUTE;
    let mut world = fleet_of(2, &[1, 2]);
    // Two agents per instance; one more instance fits, two do not.
    world.server.license_limit = Some(3);
    world.server.queue = queued(&[1, 1, 1, 1], now);
    let h = Harness::new(world, settings(3, 5, 2, 2));

    let report = h.runner.run_cycle(now).await;
    assert_eq!(report.decision.as_ref().unwrap().new_capacity, 3);
}

#[tokio::test]
async fn disabled_autoscaling_touches_nothing() {
    let now = 90 * MINUTE;
    let mut world = fleet_of(4, &[]);
    world.server.queue = queued(&[30, 40, 50, 60, 70], now);
    let mut config = FileConfig::scaffold("sfr-it", "us-east-1");
    config.autoscaling.enabled = false;
    let h = Harness::new(world, config.validate().unwrap());

    let report = h.runner.run_cycle(now).await;
    assert!(report.decision.is_none());
    let calls = h.fleet.journal().await;
    assert!(!calls.iter().any(|e| e.starts_with("modify") || e.starts_with("terminate")));
}

#[tokio::test]
async fn foreign_agents_survive_and_stale_work_is_aborted_first() {
    let mut world = fleet_of(1, &[1]);
    // Left over from an instance terminated in an earlier cycle.
    world.server.add_agent(50, "ip-10-9-9-9.ec2.internal", true);
    world.server.add_running("PROJ-PLAN-JOB1-42", 50);
    // Not part of the fleet, and its name matches no instance.
    world.server.add_agent(60, "mac-builder-01", false);
    world.server.add_agent(61, "ip-10-9-9-9.corp.example", false);
    let h = Harness::new(world, settings(3, 5, 2, 2));

    let report = h.runner.run_cycle(0).await;
    let teardown = report.teardown.as_ref().unwrap();
    assert_eq!(teardown.removed, vec![50]);
    assert_eq!(teardown.foreign_retained, 2);

    assert_eq!(
        h.server.journal().await,
        vec!["abort PROJ-PLAN-JOB1-42", "remove 50"]
    );
    let ids: Vec<_> = h.world().await.server.agents.iter().map(|a| a.id).collect();
    assert!(ids.contains(&60) && ids.contains(&61));
}

#[tokio::test]
async fn timed_out_removal_is_retried_next_cycle() {
    let mut world = fleet_of(1, &[1]);
    world.server.add_agent(70, "ip-10-8-8-8.ec2.internal", false);
    world.server.add_agent(71, "ip-10-8-8-9.ec2.internal", false);
    world.server.removal_timeouts.insert(70);
    let h = Harness::new(world, settings(3, 5, 2, 2));

    let report = h.runner.run_cycle(0).await;
    let teardown = report.teardown.as_ref().unwrap();
    assert_eq!(teardown.removed, vec![71]);
    assert_eq!(teardown.failed, vec![70]);

    // Next cycle, the registry answers in time.
    let mut world = h.world().await;
    world.server.removal_timeouts.clear();
    let h = Harness::new(world, settings(3, 5, 2, 2));
    let report = h.runner.run_cycle(0).await;
    assert_eq!(report.teardown.as_ref().unwrap().removed, vec![70]);
}

#[tokio::test]
async fn fleet_cancelled_only_when_queue_empty() {
    let mut config = FileConfig::scaffold("sfr-it", "us-east-1");
    config.fleet.terminate_when_idle = true;
    let settings = config.validate().unwrap();

    let mut world = fleet_of(2, &[]);
    world.server.queue = queued(&[0], 0);
    let h = Harness::new(world, settings.clone());
    let report = h.runner.run_cycle(0).await;
    assert!(report.status(Phase::CancelFleet).unwrap().is_skipped());
    assert!(h.fleet.snapshot().await.state.contains("active"));

    let h = Harness::new(fleet_of(2, &[]), settings);
    let report = h.runner.run_cycle(0).await;
    assert!(report.status(Phase::CancelFleet).unwrap().is_success());
    assert!(h.fleet.journal().await.iter().any(|e| e == "cancel sfr-it"));
    assert!(h.fleet.snapshot().await.instances.is_empty());
}

#[tokio::test]
async fn authorization_failure_on_modify_does_not_stop_agent_teardown() {
    let now = 30 * MINUTE;
    let mut world = fleet_of(2, &[1, 2]);
    world.server.queue = queued(&[1, 1, 1, 1], now);
    world.server.add_agent(90, "ip-10-7-7-7.ec2.internal", false);
    world.fleet.failures.insert(
        FleetOp::Modify,
        FleetApiError::from_service_code("UnauthorizedOperation", "ec2:ModifySpotFleetRequest"),
    );
    let h = Harness::new(world, settings(3, 5, 2, 2));

    let report = h.runner.run_cycle(now).await;
    match report.status(Phase::ApplyCapacity).unwrap() {
        PhaseStatus::Failed { class, .. } => assert_eq!(*class, ErrorClass::Authorization),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(report.teardown.as_ref().unwrap().removed, vec![90]);
    assert!(report.has_failures());
}

#[tokio::test]
async fn identical_inputs_give_identical_decisions() {
    let now = 20 * MINUTE;
    let mut world = fleet_of(6, &[2, 5]);
    world.server.queue = queued(&[3, 9], now);

    let first = Harness::new(world.clone(), settings(3, 5, 2, 2));
    let second = Harness::new(world, settings(3, 5, 2, 2));
    let a = first.runner.run_cycle(now).await;
    let b = second.runner.run_cycle(now).await;
    assert_eq!(a.decision, b.decision);
    assert_eq!(first.fleet.journal().await, second.fleet.journal().await);
}

#[tokio::test]
async fn report_serializes_to_json() {
    let h = Harness::new(fleet_of(5, &[1, 2]), settings(3, 5, 2, 2));
    let report = h.runner.run_cycle(0).await;

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["fleet_id"], "sfr-it");
    assert_eq!(json["decision"]["direction"], "scale_down");
    assert_eq!(json["phases"][0]["phase"], "gather");
    assert_eq!(json["phases"][0]["status"], "succeeded");
}
