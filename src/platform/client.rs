use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Poll interval used by the default `wait_for_instance_state` loop.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle state an instance reports through its platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
    #[default]
    Unknown,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOperation {
    Scan,
    #[default]
    Install,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebootPolicy {
    #[default]
    IfRequired,
    Never,
    Always,
}

/// Platform-agnostic patch parameters built by the asset processor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchRequest {
    pub operation: PatchOperation,
    pub reboot_policy: RebootPolicy,

    /// Optional override of the platform's configured patch baseline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,

    /// When true the platform call blocks until patching finishes.
    #[serde(default)]
    pub synchronous: bool,
}

/// Outcome of a platform patch operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchSummary {
    pub output: String,
    pub needs_reboot: bool,
}

/// Post-patch compliance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchCompliance {
    Compliant,
    NonCompliant,
    #[default]
    Unknown,
}

impl std::fmt::Display for PatchCompliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Compliant => "compliant",
            Self::NonCompliant => "non_compliant",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Uniform set of operations an external adapter provides for one
/// compute platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn reimage_instance(&self, instance_id: &str, image_ref: &str) -> Result<()>;

    async fn reboot_instance(&self, instance_id: &str) -> Result<()>;

    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;

    async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceState>;

    /// Bounded poll loop over `get_instance_status`. Adapters with a
    /// native waiter (cloud SDK waiters, orchestrator watch APIs) should
    /// override this.
    async fn wait_for_instance_state(
        &self,
        instance_id: &str,
        target: InstanceState,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.get_instance_status(instance_id).await {
                Ok(state) if state == target => return Ok(()),
                Ok(state) => {
                    debug!(instance_id, current = %state, target = %target, "Waiting for instance state");
                }
                // Transient status poll failures do not abort the wait.
                Err(e) => {
                    debug!(instance_id, error = %e, "Instance status poll failed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::Timeout(format!(
                    "instance {} did not reach state {} within {}s",
                    instance_id,
                    target,
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(DEFAULT_POLL_INTERVAL.min(timeout)).await;
        }
    }

    async fn apply_patches(&self, instance_id: &str, request: &PatchRequest)
    -> Result<PatchSummary>;

    async fn get_patch_status(&self, instance_id: &str) -> Result<PatchCompliance>;

    /// Detailed compliance data (missing patches, severities, timestamps)
    /// in whatever shape the platform reports it.
    async fn get_patch_compliance_data(&self, instance_id: &str) -> Result<Value>;
}

impl std::fmt::Debug for dyn PlatformClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlatformClient")
    }
}
