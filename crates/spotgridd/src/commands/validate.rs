use std::path::Path;

use super::load_settings;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let settings = load_settings(path)?;
    let autoscaling = if settings.thresholds.enabled {
        "enabled"
    } else {
        "disabled"
    };
    println!(
        "✓ {} is valid: fleet {} in {}, autoscaling {autoscaling}",
        path.display(),
        settings.fleet_id,
        settings.region
    );
    Ok(())
}
