use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::LockMode;

/// User-facing simulation settings
///
/// Every field has a default, so a TOML file only needs the keys it changes.
/// Values outside their limits are clamped by [`SimulationConfig::sanitized`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Maximum number of cars on the grid (active plus waiting to spawn)
    pub max_vehicles: u32,
    /// Minimum gap between two spawns, in milliseconds
    pub insert_interval_ms: u64,
    /// Base time a car waits between steps
    pub step_ms_min: u64,
    /// Random extra step time, drawn per car from `0..step_ms_jitter`
    pub step_ms_jitter: u64,
    /// Total time a car may spend reserving a crossing before backing off
    pub crossing_timeout_ms: u64,
    /// How often the inserter re-evaluates whether to spawn
    pub inserter_poll_ms: u64,
    pub lock_mode: LockMode,
}

impl SimulationConfig {
    pub const MIN_VEHICLES: u32 = 1;
    pub const MAX_VEHICLES: u32 = 1000;
    pub const DEFAULT_VEHICLES: u32 = 50;
    pub const MIN_INTERVAL_MS: u64 = 50;
    pub const MAX_INTERVAL_MS: u64 = 60_000;
    pub const DEFAULT_INTERVAL_MS: u64 = 500;
    pub const DEFAULT_STEP_MS_MIN: u64 = 200;
    pub const DEFAULT_STEP_MS_JITTER: u64 = 400;
    pub const DEFAULT_CROSSING_TIMEOUT_MS: u64 = 200;
    pub const DEFAULT_INSERTER_POLL_MS: u64 = 10;
    pub const MAX_STEP_MS: u64 = 60_000;
    pub const MAX_STEP_JITTER_MS: u64 = 60_000;
    pub const MAX_CROSSING_TIMEOUT_MS: u64 = 60_000;
    pub const MAX_INSERTER_POLL_MS: u64 = 1_000;

    /// Reads a TOML configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn sanitize_vehicles(value: u32) -> u32 {
        value.clamp(Self::MIN_VEHICLES, Self::MAX_VEHICLES)
    }

    pub fn sanitize_interval(value: u64) -> u64 {
        value.clamp(Self::MIN_INTERVAL_MS, Self::MAX_INTERVAL_MS)
    }

    /// Returns a copy with every value inside its limits
    ///
    /// Step and poll times are raised to at least 1 ms so no worker spins.
    pub fn sanitized(&self) -> Self {
        Self {
            max_vehicles: Self::sanitize_vehicles(self.max_vehicles),
            insert_interval_ms: Self::sanitize_interval(self.insert_interval_ms),
            step_ms_min: self.step_ms_min.clamp(1, Self::MAX_STEP_MS),
            step_ms_jitter: self.step_ms_jitter.min(Self::MAX_STEP_JITTER_MS),
            crossing_timeout_ms: self.crossing_timeout_ms.clamp(1, Self::MAX_CROSSING_TIMEOUT_MS),
            inserter_poll_ms: self.inserter_poll_ms.clamp(1, Self::MAX_INSERTER_POLL_MS),
            lock_mode: self.lock_mode,
        }
    }

    pub fn crossing_timeout(&self) -> Duration {
        Duration::from_millis(self.crossing_timeout_ms)
    }

    pub fn inserter_poll(&self) -> Duration {
        Duration::from_millis(self.inserter_poll_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_vehicles: Self::DEFAULT_VEHICLES,
            insert_interval_ms: Self::DEFAULT_INTERVAL_MS,
            step_ms_min: Self::DEFAULT_STEP_MS_MIN,
            step_ms_jitter: Self::DEFAULT_STEP_MS_JITTER,
            crossing_timeout_ms: Self::DEFAULT_CROSSING_TIMEOUT_MS,
            inserter_poll_ms: Self::DEFAULT_INSERTER_POLL_MS,
            lock_mode: LockMode::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
