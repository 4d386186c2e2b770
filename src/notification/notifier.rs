use std::path::PathBuf;

use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::ExecutionEvent;
use crate::config::NotificationConfig;

/// Delivers lifecycle events to the local sinks: a per-execution event
/// log and an optional hook command. Delivery failures never fail the
/// execution.
#[derive(Clone)]
pub struct Notifier {
    config: NotificationConfig,
    logs_dir: Option<PathBuf>,
}

impl Notifier {
    pub fn new(config: NotificationConfig, logs_dir: Option<PathBuf>) -> Self {
        Self { config, logs_dir }
    }

    pub async fn notify(&self, event: &ExecutionEvent) {
        if !self.config.enabled {
            return;
        }

        if self.config.event_log {
            self.write_event_log(event).await;
        }

        if let Some(hook) = &self.config.hook_command {
            self.run_hook(hook, event).await;
        }
    }

    async fn write_event_log(&self, event: &ExecutionEvent) {
        let Some(logs_dir) = &self.logs_dir else {
            return;
        };

        let log_path = logs_dir.join(format!("{}.log", event.execution_id));
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let log_line = format!("[{}] {}\n", timestamp, event.summary());

        if let Err(e) = tokio::fs::create_dir_all(logs_dir).await {
            warn!(error = %e, "Failed to create logs directory");
            return;
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await;

        match result {
            Ok(mut file) => {
                if let Err(e) = file.write_all(log_line.as_bytes()).await {
                    warn!(error = %e, "Failed to write event log");
                }
            }
            Err(e) => {
                warn!(error = %e, path = %log_path.display(), "Failed to open event log");
            }
        }
    }

    async fn run_hook(&self, hook_cmd: &str, event: &ExecutionEvent) {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(_) => return,
        };

        let result = Command::new("sh")
            .args(["-c", hook_cmd])
            .env("ROLLWAVE_EVENT", event.event_type.as_str())
            .env("ROLLWAVE_EXECUTION_ID", &event.execution_id)
            .env("ROLLWAVE_EVENT_JSON", &json)
            .output()
            .await;

        if let Err(e) = result {
            debug!(error = %e, hook = %hook_cmd, "Failed to run hook");
        }
    }
}
