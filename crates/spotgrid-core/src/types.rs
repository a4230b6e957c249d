//! Per-cycle data model shared across spotgrid crates.
//!
//! Every value here is rebuilt from the fleet provider and the build server
//! at the start of a cycle and dropped at its end. Nothing is cached across
//! cycles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Provider-assigned instance identifier (e.g. `i-0111605f74c7ab82a`).
pub type InstanceId = String;

/// Normalized network name shared by an instance and the agents running on it.
pub type JoinKey = String;

/// Build-server agent identifier.
pub type AgentId = u64;

/// Key identifying one build result on the build server.
pub type ResultKey = String;

/// Lowest target capacity ever requested from the provider.
pub const MIN_CAPACITY: u32 = 1;

/// Highest target capacity ever requested from the provider.
pub const MAX_CAPACITY: u32 = 250;

/// Tag key written to every active fleet instance.
pub const FLEET_MARKER_TAG_KEY: &str = "Bamboo-Spot-Fleet-Plugin-0811";

const MILLIS_PER_MINUTE: u64 = 60_000;

// ── Thresholds ─────────────────────────────────────────────────────

/// Operator-supplied scaling thresholds, fixed for one cycle.
///
/// All numeric fields are positive whenever `enabled` is true; the config
/// validator refuses anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingThresholds {
    pub enabled: bool,
    pub max_queued_builds: u32,
    pub max_average_queue_minutes: u32,
    pub max_idle_instances: u32,
    pub max_units_per_scale: u32,
}

impl ScalingThresholds {
    /// Thresholds with autoscaling switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_queued_builds: 0,
            max_average_queue_minutes: 0,
            max_idle_instances: 0,
            max_units_per_scale: 0,
        }
    }
}

// ── Queue ──────────────────────────────────────────────────────────

/// A build waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedItem {
    pub result_key: ResultKey,
    /// Unix timestamp (milliseconds) when the item started waiting.
    pub started_at_ms: u64,
}

/// Queue depth and wait time observed at the start of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub queued: u32,
    /// Whole minutes, truncated. `None` when the queue is empty.
    pub average_wait_minutes: Option<u32>,
}

impl QueueSnapshot {
    pub fn empty() -> Self {
        Self {
            queued: 0,
            average_wait_minutes: None,
        }
    }

    /// Build a snapshot from queued items as seen at `now_ms`.
    ///
    /// Average wait is `floor(sum(now - start) / count / 60000)`. Items that
    /// claim to start in the future count as zero wait.
    pub fn from_items(items: &[QueuedItem], now_ms: u64) -> Self {
        if items.is_empty() {
            return Self::empty();
        }

        let total_wait_ms: u64 = items
            .iter()
            .map(|item| now_ms.saturating_sub(item.started_at_ms))
            .sum();
        let count = items.len() as u64;
        let average = total_wait_ms / count / MILLIS_PER_MINUTE;

        Self {
            queued: u32::try_from(items.len()).unwrap_or(u32::MAX),
            average_wait_minutes: Some(u32::try_from(average).unwrap_or(u32::MAX)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }
}

// ── Agents ─────────────────────────────────────────────────────────

/// A non-elastic agent registered with the build server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    /// Display name, e.g. `ip-172-31-66-67.ec2.internal (2)` for the second
    /// agent on an instance.
    pub name: String,
    pub busy: bool,
}

impl AgentRecord {
    /// The name with its disambiguating suffix removed.
    pub fn join_key(&self) -> JoinKey {
        crate::ownership::join_key(&self.name)
    }
}

/// A build currently executing on an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningBuild {
    pub result_key: ResultKey,
    pub agent_id: AgentId,
}

// ── Instances ──────────────────────────────────────────────────────

/// One active fleet instance, classified by the agents bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    /// Private network name; agents are named after it.
    pub join_key: JoinKey,
    /// True when at least one bound agent is executing work.
    pub busy: bool,
}

/// Live instances of the fleet keyed by join-key.
///
/// Ordered so that iteration, and therefore termination selection, is
/// stable for identical inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMap {
    entries: BTreeMap<JoinKey, InstanceRecord>,
}

impl InstanceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance as idle. A second instance reporting the same
    /// network name replaces the first.
    pub fn insert(&mut self, join_key: &str, instance_id: &str) {
        self.entries.insert(
            join_key.to_string(),
            InstanceRecord {
                instance_id: instance_id.to_string(),
                join_key: join_key.to_string(),
                busy: false,
            },
        );
    }

    pub fn contains(&self, join_key: &str) -> bool {
        self.entries.contains_key(join_key)
    }

    pub fn get(&self, join_key: &str) -> Option<&InstanceRecord> {
        self.entries.get(join_key)
    }

    /// Mark the instance behind `join_key` busy. Returns false when no
    /// such instance is live.
    pub fn mark_busy(&mut self, join_key: &str) -> bool {
        match self.entries.get_mut(join_key) {
            Some(record) => {
                record.busy = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.entries.values()
    }

    /// Instances with no busy agent, in join-key order.
    pub fn idle(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.entries.values().filter(|r| !r.busy)
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.entries.values().map(|r| r.instance_id.clone()).collect()
    }

    /// Drop instances that are being terminated this cycle.
    pub fn retire<'a>(&mut self, join_keys: impl IntoIterator<Item = &'a JoinKey>) {
        for key in join_keys {
            self.entries.remove(key);
        }
    }
}

// ── Fleet ──────────────────────────────────────────────────────────

/// Fleet request configuration as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetDescription {
    pub target_capacity: u32,
    /// Provider request state, e.g. `active`, `cancelled_running`.
    pub state: String,
}

/// Network identity of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub instance_id: InstanceId,
    pub private_dns_name: String,
}

/// Fleet snapshot read at the start of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetState {
    pub target_capacity: u32,
    /// Number of instances the provider reports as active.
    pub active_capacity: u32,
    pub request_state: String,
    pub instances: InstanceMap,
}

impl FleetState {
    pub fn is_active(&self) -> bool {
        self.request_state.contains("active")
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
