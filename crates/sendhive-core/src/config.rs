//! SendHive configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SendHiveError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SendHiveConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl SendHiveConfig {
    /// Load config from the default path (~/.sendhive/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SendHiveError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SendHiveError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SendHiveError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the SendHive home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sendhive")
    }
}

/// Instance runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Binary launched for each account instance.
    #[serde(default = "default_instance_bin")]
    pub instance_bin: String,
    /// First port handed to instances; subsequent ones count up.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Where per-instance state and generated configs live.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Core API endpoint instances report heartbeats to.
    #[serde(default = "default_callback_url")]
    pub callback_url: String,
    /// Pause between stop and start on restart.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_instance_bin() -> String {
    "sendhive-instance".into()
}
fn default_base_port() -> u16 {
    10101
}
fn default_data_dir() -> PathBuf {
    SendHiveConfig::home_dir().join("instances")
}
fn default_callback_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_settle_delay_ms() -> u64 {
    500
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            instance_bin: default_instance_bin(),
            base_port: default_base_port(),
            data_dir: default_data_dir(),
            callback_url: default_callback_url(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// One unreachable instance must not stall the others.
    #[serde(default = "default_inspect_timeout_secs")]
    pub inspect_timeout_secs: u64,
    /// Consecutive errors before an account counts as unhealthy.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_inspect_timeout_secs() -> u64 {
    5
}
fn default_error_threshold() -> u32 {
    5
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            inspect_timeout_secs: default_inspect_timeout_secs(),
            error_threshold: default_error_threshold(),
        }
    }
}

/// Task queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent workers per queue.
    #[serde(default = "default_queue_concurrency")]
    pub queue_concurrency: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_queue_concurrency() -> usize {
    4
}
fn default_backoff_base_ms() -> u64 {
    2_000
}
fn default_backoff_cap_ms() -> u64 {
    60_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_concurrency: default_queue_concurrency(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}
