//! Capacity decision engine.
//!
//! `decide` is a pure function of its input: the same telemetry and
//! thresholds always produce the same decision. The only outward call is
//! the license predicate, which the caller supplies.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use spotgrid_core::{
    InstanceMap, MAX_CAPACITY, MIN_CAPACITY, QueueSnapshot, ScalingThresholds,
};

use crate::selector::{TerminationPlan, select_for_termination};

/// Which way the fleet moves this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ScaleUp,
    ScaleDown,
    NoOp,
}

/// Why the engine chose its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// More builds queued than `max_queued_builds`.
    QueueDepth,
    /// Average queue wait above `max_average_queue_minutes`.
    QueueWait,
    /// More idle instances than `max_idle_instances`.
    IdleExcess,
    /// Scale-up wanted, but active capacity is still above target from an
    /// earlier scale-down.
    ActiveExceedsTarget,
    /// Scale-up wanted, but the license admits no further agents.
    LicenseExhausted,
    /// No threshold crossed.
    Steady,
}

/// Telemetry for one decision.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub target_capacity: u32,
    pub active_capacity: u32,
    pub thresholds: &'a ScalingThresholds,
    pub queue: &'a QueueSnapshot,
    /// Live instances with busy/idle classification.
    pub instances: &'a InstanceMap,
    /// Agents whose join-key matches a live instance.
    pub fleet_agent_count: u32,
}

/// The engine's verdict for one cycle.
///
/// Only `decide` constructs decisions, so `direction()` is always
/// consistent with the capacities and the termination plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    previous_capacity: u32,
    new_capacity: u32,
    reason: DecisionReason,
    terminations: TerminationPlan,
}

impl ScalingDecision {
    fn hold(current: u32, reason: DecisionReason) -> Self {
        Self {
            previous_capacity: current,
            new_capacity: current,
            reason,
            terminations: TerminationPlan::default(),
        }
    }

    pub fn direction(&self) -> Direction {
        if !self.terminations.is_empty() || self.new_capacity < self.previous_capacity {
            Direction::ScaleDown
        } else if self.new_capacity > self.previous_capacity {
            Direction::ScaleUp
        } else {
            Direction::NoOp
        }
    }

    pub fn previous_capacity(&self) -> u32 {
        self.previous_capacity
    }

    pub fn new_capacity(&self) -> u32 {
        self.new_capacity
    }

    pub fn reason(&self) -> DecisionReason {
        self.reason
    }

    pub fn terminations(&self) -> &TerminationPlan {
        &self.terminations
    }

    pub fn changes_capacity(&self) -> bool {
        self.new_capacity != self.previous_capacity
    }
}

/// Compute the new target capacity and the instances to retire.
///
/// `license_allows(n)` answers whether `n` more agents may register.
pub fn decide(input: &DecisionInput<'_>, license_allows: impl Fn(u32) -> bool) -> ScalingDecision {
    let thresholds = input.thresholds;
    let current = input.target_capacity;

    if !thresholds.enabled {
        return ScalingDecision::hold(current, DecisionReason::Steady);
    }

    let mut decision = match scale_down(input) {
        Some(plan) => {
            let new_capacity = input.active_capacity.saturating_sub(plan.len() as u32);
            debug!(
                idle = input.instances.idle().count(),
                max_idle = thresholds.max_idle_instances,
                retiring = plan.len(),
                from = current,
                to = new_capacity,
                "idle instances above threshold"
            );
            ScalingDecision {
                previous_capacity: current,
                new_capacity,
                reason: DecisionReason::IdleExcess,
                terminations: plan,
            }
        }
        None => match scale_up_trigger(thresholds, input.queue) {
            Some(reason) => scale_up(input, reason, license_allows),
            None => ScalingDecision::hold(current, DecisionReason::Steady),
        },
    };

    decision.new_capacity = decision.new_capacity.clamp(MIN_CAPACITY, MAX_CAPACITY);
    decision
}

/// Plan a scale-down when idle instances exceed the threshold.
fn scale_down(input: &DecisionInput<'_>) -> Option<TerminationPlan> {
    let idle = input.instances.idle().count();
    if idle <= input.thresholds.max_idle_instances as usize {
        return None;
    }
    let count = idle.min(input.thresholds.max_units_per_scale as usize);
    Some(select_for_termination(input.instances, count))
}

fn scale_up_trigger(thresholds: &ScalingThresholds, queue: &QueueSnapshot) -> Option<DecisionReason> {
    if queue.queued > thresholds.max_queued_builds {
        return Some(DecisionReason::QueueDepth);
    }
    match queue.average_wait_minutes {
        Some(wait) if wait > thresholds.max_average_queue_minutes => Some(DecisionReason::QueueWait),
        _ => None,
    }
}

fn scale_up(
    input: &DecisionInput<'_>,
    reason: DecisionReason,
    license_allows: impl Fn(u32) -> bool,
) -> ScalingDecision {
    let current = input.target_capacity;
    let active = input.active_capacity;

    if active > current {
        warn!(
            active,
            target = current,
            "scale-up requested while active capacity exceeds target; \
             the cycle interval may be too short"
        );
        return ScalingDecision::hold(current, DecisionReason::ActiveExceedsTarget);
    }

    // No instances means no measured agent density, so no license cap.
    let agents_per_instance = match input.instances.len() {
        0 => None,
        n => Some(input.fleet_agent_count / n as u32),
    };

    let mut granted = 0;
    for units in 1..=input.thresholds.max_units_per_scale {
        if let Some(per_instance) = agents_per_instance
            && !license_allows(per_instance.saturating_mul(units))
        {
            break;
        }
        granted = units;
    }

    if granted == 0 {
        warn!(target = current, "license admits no further agents; not scaling up");
        return ScalingDecision::hold(current, DecisionReason::LicenseExhausted);
    }

    let new_capacity = current.max(active.saturating_add(granted));
    debug!(
        ?reason,
        queued = input.queue.queued,
        wait = ?input.queue.average_wait_minutes,
        from = current,
        to = new_capacity,
        "queue above threshold"
    );

    ScalingDecision {
        previous_capacity: current,
        new_capacity,
        reason,
        terminations: TerminationPlan::default(),
    }
}
