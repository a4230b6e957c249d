use std::path::Path;

use spotgrid_core::FileConfig;

pub fn run(fleet_id: &str, region: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let rendered = FileConfig::scaffold(fleet_id, region).to_toml_string()?;

    match output {
        Some(path) => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            std::fs::write(path, rendered)?;
            println!("✓ Generated {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
