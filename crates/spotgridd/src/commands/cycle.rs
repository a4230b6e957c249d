use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use spotgrid_core::epoch_millis;
use spotgrid_reconcile::{Collaborators, CycleRunner, MemoryBuildServer, MemoryFleet, World};

use super::load_settings;

/// Run one cycle against the snapshot at `world_path` and print the report.
pub async fn run(
    config: &Path,
    world_path: &Path,
    now_ms: Option<u64>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let settings = load_settings(config)?;

    let raw = std::fs::read_to_string(world_path)
        .with_context(|| format!("failed to read {}", world_path.display()))?;
    let world: World = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", world_path.display()))?;

    if world.fleet.fleet_id != settings.fleet_id {
        warn!(
            configured = %settings.fleet_id,
            snapshot = %world.fleet.fleet_id,
            "world snapshot describes a different fleet"
        );
    }

    let fleet = Arc::new(MemoryFleet::new(world.fleet));
    let server = Arc::new(MemoryBuildServer::new(world.server));
    let runner = CycleRunner::new(
        settings,
        Collaborators::in_memory(fleet.clone(), server.clone()),
    );

    let report = runner.run_cycle(now_ms.unwrap_or_else(epoch_millis)).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if dry_run {
        info!(path = ?world_path, "dry run; world snapshot left unchanged");
        return Ok(());
    }

    let updated = World {
        fleet: fleet.snapshot().await,
        server: server.snapshot().await,
    };
    std::fs::write(world_path, serde_json::to_string_pretty(&updated)?)
        .with_context(|| format!("failed to write {}", world_path.display()))?;
    info!(path = ?world_path, "world snapshot updated");

    Ok(())
}
