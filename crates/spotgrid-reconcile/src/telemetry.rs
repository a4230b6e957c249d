//! Telemetry gatherer: turns collaborator data into decision inputs.
//!
//! Nothing here decides anything; it reads the fleet, the queue, and the
//! agent list, and joins agents to instances by network name.

use tracing::{debug, warn};

use spotgrid_core::{AgentRecord, FleetState, InstanceMap, QueueSnapshot};

use crate::error::{FleetResult, ServerResult};
use crate::ports::{BuildQueue, FleetApi};

/// Read the fleet's capacity, state, and live instances.
///
/// The returned instance map has every instance marked idle; call
/// [`classify_agents`] to mark the busy ones.
pub async fn read_fleet(api: &dyn FleetApi, fleet_id: &str) -> FleetResult<FleetState> {
    let description = api.describe_fleet(fleet_id).await?;
    let instance_ids = api.describe_fleet_instances(fleet_id).await?;

    let mut instances = InstanceMap::new();
    // An empty id list would describe every instance in the account.
    if !instance_ids.is_empty() {
        for described in api.describe_instances(&instance_ids).await? {
            if described.private_dns_name.is_empty() {
                debug!(instance = %described.instance_id, "instance has no network name yet");
                continue;
            }
            instances.insert(&described.private_dns_name, &described.instance_id);
        }
    }

    let state = FleetState {
        target_capacity: description.target_capacity,
        active_capacity: u32::try_from(instance_ids.len()).unwrap_or(u32::MAX),
        request_state: description.state,
        instances,
    };

    if !state.is_active() {
        warn!(
            fleet = fleet_id,
            state = %state.request_state,
            "fleet request is not active"
        );
    }

    debug!(
        fleet = fleet_id,
        target = state.target_capacity,
        active = state.active_capacity,
        named = state.instances.len(),
        "fleet state read"
    );

    Ok(state)
}

/// Read the build queue as of `now_ms`.
pub async fn read_queue(queue: &dyn BuildQueue, now_ms: u64) -> ServerResult<QueueSnapshot> {
    let items = queue.queued_items().await?;
    let snapshot = QueueSnapshot::from_items(&items, now_ms);
    debug!(
        queued = snapshot.queued,
        wait_minutes = ?snapshot.average_wait_minutes,
        "queue read"
    );
    Ok(snapshot)
}

/// Mark instances with a busy agent and count fleet agents.
///
/// Returns the number of agents whose join-key matches a live instance.
pub fn classify_agents(instances: &mut InstanceMap, agents: &[AgentRecord]) -> u32 {
    let mut fleet_agents = 0;
    for agent in agents {
        let key = agent.join_key();
        if !instances.contains(&key) {
            continue;
        }
        fleet_agents += 1;
        if agent.busy {
            instances.mark_busy(&key);
        }
    }

    if (fleet_agents as usize) < instances.len() {
        warn!(
            agents = fleet_agents,
            instances = instances.len(),
            "fewer fleet agents than instances; agent installation may have failed \
             or the cycle interval is too short"
        );
    }

    fleet_agents
}
