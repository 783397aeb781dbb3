use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::{HashError, Result};

/// Tunables of a [`super::StepScheduler`].
///
/// Every field has a default, so a config file only needs to name the ones
/// it changes. Durations are stored as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Bytes per step when a job runs on a time slice
    pub step_bytes: u64,
    /// Percentage added to every duration estimate
    pub estimate_pad_percent: u64,
    /// Constant added to every duration estimate
    pub estimate_pad_constant_ms: u64,
    /// Length of the completed job history
    pub completed_max: usize,
    /// Hashing time needed before a speed is reported
    pub min_speed_sample_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            step_bytes: 10_000,
            estimate_pad_percent: 10,
            estimate_pad_constant_ms: 10,
            completed_max: 50,
            min_speed_sample_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON config file. A file that cannot be read is reported
    /// with its path attached.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("scheduler: loading config from {}", path.display());
        let json = fs::read_to_string(path).with_context(|| {
            format!("failed to read scheduler config {}", path.display())
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_bytes == 0 {
            return Err(HashError::Config(
                "step_bytes must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn estimate_pad_constant(&self) -> Duration {
        Duration::from_millis(self.estimate_pad_constant_ms)
    }

    pub fn min_speed_sample(&self) -> Duration {
        Duration::from_millis(self.min_speed_sample_ms)
    }
}
