//! Configuration schema types for `pxw.toml`
//!
//! Defines the structure and validation rules for pixelwarden configuration.

use serde::{Deserialize, Serialize};

use crate::coords::DEFAULT_TILE_SIZE;
use crate::scheduler::ScanMode;

/// Largest tile size whose pixel offsets still fit the key format.
pub const MAX_TILE_SIZE: u32 = 9999;

/// Canvas backend section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Base URL of the placement backend
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Chunk edge length in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    /// Token injected into placement requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self { base_url: default_base_url(), tile_size: default_tile_size(), auth_token: None }
    }
}

/// Scheduler section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Placement order within border and interior pixels
    #[serde(default)]
    pub mode: ScanMode,
    /// Sleep whole charge waits in one step
    #[serde(default)]
    pub low_activity: bool,
    /// Arm the protection monitor on completion
    #[serde(default)]
    pub protect: bool,
    #[serde(default = "default_protect_interval")]
    pub protect_interval_secs: u64,
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_secs: u64,
    #[serde(default = "default_cycle_retry")]
    pub cycle_retry_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_quota_refresh")]
    pub quota_refresh_secs: u64,
    /// Seed for random mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_protect_interval() -> u64 {
    10
}

fn default_rate_limit_backoff() -> u64 {
    30
}

fn default_cycle_retry() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    1
}

fn default_quota_refresh() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::default(),
            low_activity: false,
            protect: false,
            protect_interval_secs: default_protect_interval(),
            rate_limit_backoff_secs: default_rate_limit_backoff(),
            cycle_retry_secs: default_cycle_retry(),
            poll_interval_secs: default_poll_interval(),
            quota_refresh_secs: default_quota_refresh(),
            seed: None,
        }
    }
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON log lines
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level(), json: false }
    }
}

/// Complete pxw.toml configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PxwConfig {
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "scheduler.poll_interval_secs")
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pxw.toml: '{}' {}", self.field, self.message)
    }
}

impl PxwConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.canvas.base_url.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "canvas.base_url".to_string(),
                message: "must be a non-empty URL".to_string(),
            });
        }

        if self.canvas.tile_size == 0 || self.canvas.tile_size > MAX_TILE_SIZE {
            errors.push(ConfigValidationError {
                field: "canvas.tile_size".to_string(),
                message: format!("must be between 1 and {}", MAX_TILE_SIZE),
            });
        }

        let intervals = [
            ("protect_interval_secs", self.scheduler.protect_interval_secs),
            ("rate_limit_backoff_secs", self.scheduler.rate_limit_backoff_secs),
            ("cycle_retry_secs", self.scheduler.cycle_retry_secs),
            ("poll_interval_secs", self.scheduler.poll_interval_secs),
            ("quota_refresh_secs", self.scheduler.quota_refresh_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                errors.push(ConfigValidationError {
                    field: format!("scheduler.{}", name),
                    message: "must be a positive integer".to_string(),
                });
            }
        }

        if self.logging.level.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "logging.level".to_string(),
                message: "must be a non-empty filter".to_string(),
            });
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}
