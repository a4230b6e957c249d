//! spotgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, ConfigResult, FieldError};
use crate::ownership::{DEFAULT_AGENT_NAME_PATTERN, FleetOwnership};
use crate::types::ScalingThresholds;

/// Region codes the fleet may live in.
pub const SUPPORTED_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-central-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "ap-northeast-2",
    "sa-east-1",
];

const DEFAULT_TEARDOWN_CONCURRENCY: u32 = 4;

const EMPTY: &str = "can't be empty";
const NOT_POSITIVE: &str = "integer value must be positive";
const MISSING_THRESHOLD: &str = "autoscaling inputs must be positive integers";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub fleet: FleetSection,
    #[serde(default)]
    pub autoscaling: AutoscalingSection,
    #[serde(default)]
    pub agents: AgentsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub terminate_when_idle: bool,
}

/// Thresholds are signed so that negative values reach the validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoscalingSection {
    #[serde(default)]
    pub enabled: bool,
    pub max_queued_builds: Option<i64>,
    pub max_average_queue_minutes: Option<i64>,
    pub max_idle_instances: Option<i64>,
    pub max_units_per_scale: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsSection {
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,
    #[serde(default = "default_teardown_concurrency")]
    pub teardown_concurrency: u32,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            name_pattern: default_name_pattern(),
            teardown_concurrency: default_teardown_concurrency(),
        }
    }
}

fn default_name_pattern() -> String {
    DEFAULT_AGENT_NAME_PATTERN.to_string()
}

fn default_teardown_concurrency() -> u32 {
    DEFAULT_TEARDOWN_CONCURRENCY
}

/// Validated settings for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    pub fleet_id: String,
    pub region: String,
    pub terminate_fleet_when_idle: bool,
    pub thresholds: ScalingThresholds,
    pub ownership: FleetOwnership,
    pub teardown_concurrency: usize,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with autoscaling enabled at conservative thresholds.
    pub fn scaffold(fleet_id: &str, region: &str) -> Self {
        FileConfig {
            fleet: FleetSection {
                id: fleet_id.to_string(),
                region: region.to_string(),
                terminate_when_idle: false,
            },
            autoscaling: AutoscalingSection {
                enabled: true,
                max_queued_builds: Some(3),
                max_average_queue_minutes: Some(5),
                max_idle_instances: Some(2),
                max_units_per_scale: Some(2),
            },
            agents: AgentsSection::default(),
        }
    }

    /// Validate every field and produce cycle settings.
    ///
    /// All problems are collected before returning so that an operator sees
    /// the full list at once.
    pub fn validate(&self) -> ConfigResult<CycleSettings> {
        let mut errors = Vec::new();

        if self.fleet.id.trim().is_empty() {
            errors.push(FieldError::new("fleet.id", EMPTY));
        }

        let region = region_code(&self.fleet.region);
        if region.is_empty() {
            errors.push(FieldError::new("fleet.region", EMPTY));
        } else if !SUPPORTED_REGIONS.contains(&region) {
            errors.push(FieldError::new(
                "fleet.region",
                &format!("unsupported region: {region}"),
            ));
        }

        let thresholds = self.autoscaling.thresholds(&mut errors);

        let ownership = match FleetOwnership::new(&self.agents.name_pattern) {
            Ok(o) => Some(o),
            Err(e) => {
                errors.push(FieldError::new(
                    "agents.name_pattern",
                    &format!("invalid pattern: {e}"),
                ));
                None
            }
        };

        if self.agents.teardown_concurrency == 0 {
            errors.push(FieldError::new("agents.teardown_concurrency", NOT_POSITIVE));
        }

        match ownership {
            Some(ownership) if errors.is_empty() => Ok(CycleSettings {
                fleet_id: self.fleet.id.trim().to_string(),
                region: region.to_string(),
                terminate_fleet_when_idle: self.fleet.terminate_when_idle,
                thresholds,
                ownership,
                teardown_concurrency: self.agents.teardown_concurrency as usize,
            }),
            _ => Err(ConfigError::Invalid(errors)),
        }
    }
}

impl AutoscalingSection {
    fn thresholds(&self, errors: &mut Vec<FieldError>) -> ScalingThresholds {
        if !self.enabled {
            return ScalingThresholds::disabled();
        }

        let fields = [
            ("autoscaling.max_queued_builds", self.max_queued_builds),
            ("autoscaling.max_average_queue_minutes", self.max_average_queue_minutes),
            ("autoscaling.max_idle_instances", self.max_idle_instances),
            ("autoscaling.max_units_per_scale", self.max_units_per_scale),
        ];

        if fields.iter().any(|(_, v)| v.is_none()) {
            errors.push(FieldError::new("autoscaling.enabled", MISSING_THRESHOLD));
            return ScalingThresholds::disabled();
        }

        let mut values = [0u32; 4];
        for (slot, (field, value)) in values.iter_mut().zip(fields) {
            match value.and_then(|v| u32::try_from(v).ok()).filter(|v| *v > 0) {
                Some(v) => *slot = v,
                None => errors.push(FieldError::new(field, NOT_POSITIVE)),
            }
        }

        ScalingThresholds {
            enabled: true,
            max_queued_builds: values[0],
            max_average_queue_minutes: values[1],
            max_idle_instances: values[2],
            max_units_per_scale: values[3],
        }
    }
}

/// Reduce a region label such as `us-east-1 (N. Virginia)` to its code.
fn region_code(label: &str) -> &str {
    label.split(" (").next().unwrap_or_default().trim()
}
