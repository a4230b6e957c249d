//! Fleet reconciler: applies a scaling decision to the fleet provider.
//!
//! Each operation is independent: a failure is reported in its
//! `PhaseStatus`, logged, and not retried within the cycle.

use std::sync::Arc;

use tracing::{error, info, warn};

use spotgrid_core::{FLEET_MARKER_TAG_KEY, InstanceId};

use crate::cycle::PhaseStatus;
use crate::error::ErrorClass;
use crate::ports::{BuildQueue, FleetApi};

pub struct FleetReconciler {
    api: Arc<dyn FleetApi>,
    fleet_id: String,
}

impl FleetReconciler {
    pub fn new(api: Arc<dyn FleetApi>, fleet_id: &str) -> Self {
        Self {
            api,
            fleet_id: fleet_id.to_string(),
        }
    }

    pub fn fleet_id(&self) -> &str {
        &self.fleet_id
    }

    /// Request `new_capacity` unless it equals `current`.
    pub async fn apply_capacity(&self, current: u32, new_capacity: u32) -> PhaseStatus {
        if current == new_capacity {
            info!(fleet = %self.fleet_id, capacity = current, "no scaling decision made");
            return PhaseStatus::skipped("target capacity unchanged");
        }

        match self.api.modify_capacity(&self.fleet_id, new_capacity).await {
            Ok(true) => {
                info!(
                    fleet = %self.fleet_id,
                    from = current,
                    to = new_capacity,
                    "fleet target capacity changed"
                );
                PhaseStatus::succeeded(format!("target capacity {current} -> {new_capacity}"))
            }
            Ok(false) => {
                error!(fleet = %self.fleet_id, to = new_capacity, "modify fleet request rejected");
                PhaseStatus::failed(ErrorClass::Client, "modify fleet request rejected by provider")
            }
            Err(e) => {
                error!(fleet = %self.fleet_id, error = %e, "modify fleet request failed");
                PhaseStatus::from_fleet_error(&e)
            }
        }
    }

    /// Terminate exactly the given instances.
    pub async fn terminate_instances(&self, instance_ids: &[InstanceId]) -> PhaseStatus {
        if instance_ids.is_empty() {
            return PhaseStatus::skipped("no instances selected for termination");
        }

        match self.api.terminate_instances(instance_ids).await {
            Ok(()) => {
                info!(fleet = %self.fleet_id, instances = ?instance_ids, "idle instances terminated");
                PhaseStatus::succeeded(format!("terminated {}", instance_ids.join(", ")))
            }
            Err(e) => {
                error!(fleet = %self.fleet_id, instances = ?instance_ids, error = %e, "instance termination failed");
                PhaseStatus::from_fleet_error(&e)
            }
        }
    }

    /// Tag active instances with the fleet marker. Best-effort.
    pub async fn tag_active_instances(&self, instance_ids: &[InstanceId]) -> PhaseStatus {
        if instance_ids.is_empty() {
            return PhaseStatus::skipped("no active instances");
        }

        match self
            .api
            .tag_resources(instance_ids, FLEET_MARKER_TAG_KEY, "")
            .await
        {
            Ok(()) => PhaseStatus::succeeded(format!("tagged {} instance(s)", instance_ids.len())),
            Err(e) => {
                warn!(fleet = %self.fleet_id, error = %e, "tagging instances failed");
                PhaseStatus::from_fleet_error(&e)
            }
        }
    }

    /// Cancel the fleet, terminating its instances, if no build is queued.
    ///
    /// The queue is read at call time, not taken from the cycle's snapshot.
    pub async fn cancel_fleet_if_idle(&self, queue: &dyn BuildQueue) -> PhaseStatus {
        let queued = match queue.queued_items().await {
            Ok(items) => items.len(),
            Err(e) => {
                error!(fleet = %self.fleet_id, error = %e, "could not read build queue before cancelling fleet");
                return PhaseStatus::failed(e.class(), e.to_string());
            }
        };

        if queued > 0 {
            info!(fleet = %self.fleet_id, queued, "builds still queued; fleet kept");
            return PhaseStatus::skipped(format!("{queued} build(s) still queued"));
        }

        match self.api.cancel_fleet(&self.fleet_id, true).await {
            Ok(cancelled) if cancelled.is_empty() => {
                error!(fleet = %self.fleet_id, "cancellation of fleet failed");
                PhaseStatus::failed(ErrorClass::Client, "provider cancelled no fleet requests")
            }
            Ok(_) => {
                info!(fleet = %self.fleet_id, "cancellation of fleet succeeded");
                PhaseStatus::succeeded("fleet cancelled with instance termination")
            }
            Err(e) => {
                error!(fleet = %self.fleet_id, error = %e, "cancel fleet request failed");
                PhaseStatus::from_fleet_error(&e)
            }
        }
    }
}
