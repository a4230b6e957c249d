pub mod cycle;
pub mod init;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use spotgrid_core::{ConfigError, CycleSettings, FileConfig};

/// Read and validate a config file, printing every field error on failure.
pub fn load_settings(path: &Path) -> anyhow::Result<CycleSettings> {
    let config = FileConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    match config.validate() {
        Ok(settings) => Ok(settings),
        Err(ConfigError::Invalid(errors)) => {
            for error in &errors {
                eprintln!("  {error}");
            }
            anyhow::bail!("{} invalid field(s) in {}", errors.len(), path.display())
        }
        Err(e) => Err(e.into()),
    }
}
