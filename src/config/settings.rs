use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{EngineError, Result};

/// Top-level engine configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    pub health: HealthConfig,
    pub notification: NotificationConfig,
    pub store: StoreConfig,
}

impl EngineConfig {
    pub async fn load(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, config_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = config_dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.engine.execution_timeout_secs == 0 {
            errors.push("engine.execution_timeout_secs must be greater than 0");
        }
        if self.engine.state_wait_timeout_secs == 0 {
            errors.push("engine.state_wait_timeout_secs must be greater than 0");
        }
        if self.engine.pause_poll_ms == 0 {
            errors.push("engine.pause_poll_ms must be greater than 0");
        }

        if self.health.default_timeout_secs == 0 {
            errors.push("health.default_timeout_secs must be greater than 0");
        }
        if self.health.default_retries == 0 {
            errors.push("health.default_retries must be greater than 0");
        }
        if self.health.backoff_cap_secs == 0 {
            errors.push("health.backoff_cap_secs must be greater than 0");
        }
        if self.health.http_body_cap == 0 {
            errors.push("health.http_body_cap must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Config(errors.join("; ")))
        }
    }
}

/// Timing knobs for the execution engine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Hard ceiling for one execution's background task.
    pub execution_timeout_secs: u64,

    /// How long the asset processor waits for an instance to reach a
    /// target platform state.
    pub state_wait_timeout_secs: u64,

    /// Poll interval while an execution sits in `paused` at a phase
    /// boundary.
    pub pause_poll_ms: u64,

    /// Default ceiling for a rollback pass when the plan does not set one.
    pub rollback_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            execution_timeout_secs: 4 * 3600,
            state_wait_timeout_secs: 600,
            pause_poll_ms: 500,
            rollback_timeout_secs: 1800,
        }
    }
}

/// Defaults and bounds for the health checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub default_timeout_secs: u64,
    pub default_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_secs: u64,
    pub banner_timeout_secs: u64,
    /// Response body bytes considered for substring matching.
    pub http_body_cap: usize,
    pub default_http_status: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            default_retries: 3,
            backoff_base_ms: 1000,
            backoff_cap_secs: 30,
            banner_timeout_secs: 5,
            http_body_cap: 1024,
            default_http_status: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub event_log: bool,
    pub hook_command: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            event_log: true,
            hook_command: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Sqlite database path; `None` means the embedding application
    /// supplies its own store implementation.
    pub db_path: Option<PathBuf>,
}
