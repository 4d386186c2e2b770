use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::{EngineError, Result};
use crate::health::{HealthChecker, HealthCheckSpec};
use crate::inventory::{ActivityRecord, AssetInventory, AssetRecord};
use crate::platform::{
    InstanceState, PatchCompliance, PatchOperation, PatchRequest, PlatformClient, PlatformRegistry,
    RebootPolicy,
};
use crate::plan::{AssetAction, AssetTarget};

/// Uniform outcome of one asset action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Set by patch operations when the platform reports a pending reboot.
    #[serde(default)]
    pub needs_reboot: bool,
}

/// Executes one action against one asset, delegating platform-specific
/// work to the registered `PlatformClient` for the asset's platform tag.
///
/// The processor never retries platform calls; retry, where present, is
/// local to the health checker.
pub struct AssetProcessor {
    platforms: Arc<PlatformRegistry>,
    inventory: Arc<dyn AssetInventory>,
    health: HealthChecker,
    settings: EngineSettings,
}

impl AssetProcessor {
    pub fn new(
        platforms: Arc<PlatformRegistry>,
        inventory: Arc<dyn AssetInventory>,
        health: HealthChecker,
        settings: EngineSettings,
    ) -> Self {
        Self {
            platforms,
            inventory,
            health,
            settings,
        }
    }

    /// Runs `action` against `asset`.
    ///
    /// Input-validation failures return an error before any platform
    /// call; platform failures come back as an unsuccessful result.
    /// Either way an audit activity row is recorded best-effort.
    pub async fn process_asset(
        &self,
        asset: &AssetTarget,
        action: AssetAction,
        params: &HashMap<String, Value>,
    ) -> Result<ActionResult> {
        let started_at = Utc::now();
        let started = Instant::now();

        debug!(asset_id = %asset.id, action = %action, "Processing asset");

        let outcome = self.run_action(asset, action, params).await;

        let completed_at = Utc::now();
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(mut result) => {
                result.started_at = started_at;
                result.completed_at = completed_at;
                result.duration_ms = duration_ms;
                result
            }
            Err(e) if e.is_input_error() => {
                self.record_activity(asset, action, false, &e.to_string())
                    .await;
                return Err(e);
            }
            Err(e) => ActionResult {
                success: false,
                output: String::new(),
                error: Some(e.to_string()),
                duration_ms,
                started_at,
                completed_at,
                metadata: HashMap::new(),
                needs_reboot: false,
            },
        };

        let detail = if result.success {
            result.output.clone()
        } else {
            result.error.clone().unwrap_or_default()
        };
        self.record_activity(asset, action, result.success, &detail)
            .await;

        info!(
            asset_id = %asset.id,
            action = %action,
            success = result.success,
            duration_ms = result.duration_ms,
            "Asset action finished"
        );

        Ok(result)
    }

    async fn run_action(
        &self,
        asset: &AssetTarget,
        action: AssetAction,
        params: &HashMap<String, Value>,
    ) -> Result<ActionResult> {
        match action {
            AssetAction::Reimage => self.reimage(asset, params).await,
            AssetAction::Reboot => self.reboot(asset).await,
            AssetAction::Terminate => self.terminate(asset).await,
            AssetAction::Patch => self.patch(asset, params).await,
            AssetAction::Update => self.update(asset, params).await,
            AssetAction::Validate => self.validate(asset, params).await,
        }
    }

    async fn reimage(
        &self,
        asset: &AssetTarget,
        params: &HashMap<String, Value>,
    ) -> Result<ActionResult> {
        // Target image comes from the explicit parameter or the asset's
        // pre-set target; its absence is an input error, checked before
        // any platform interaction.
        let image = match params.get("image").and_then(Value::as_str) {
            Some(image) => image.to_string(),
            None => self
                .inventory
                .get_asset(&asset.id)
                .await?
                .and_then(|r| r.target_image)
                .ok_or_else(|| {
                    EngineError::InvalidInput(format!(
                        "reimage of {} requires a target image and none is set",
                        asset.id
                    ))
                })?,
        };

        let client = self.client_for(asset)?;
        client.reimage_instance(&asset.id, &image).await?;
        client
            .wait_for_instance_state(&asset.id, InstanceState::Running, self.state_wait_timeout())
            .await?;

        // Reflect the new image on the stored record.
        let mut record = self.stored_or_default(asset).await?;
        record.image_ref = Some(image.clone());
        record.state = InstanceState::Running.to_string();
        self.inventory.update_asset(record).await?;

        Ok(success_result(
            format!("reimaged to {}", image),
            HashMap::from([("image".to_string(), Value::String(image))]),
        ))
    }

    async fn reboot(&self, asset: &AssetTarget) -> Result<ActionResult> {
        let client = self.client_for(asset)?;
        client.reboot_instance(&asset.id).await?;
        client
            .wait_for_instance_state(&asset.id, InstanceState::Running, self.state_wait_timeout())
            .await?;

        Ok(success_result("reboot completed".to_string(), HashMap::new()))
    }

    async fn terminate(&self, asset: &AssetTarget) -> Result<ActionResult> {
        let client = self.client_for(asset)?;
        client.terminate_instance(&asset.id).await?;

        // Termination was already irreversibly requested; failing to
        // confirm it within the poll window is a warning, not an error.
        let mut output = "termination confirmed".to_string();
        if let Err(e) = client
            .wait_for_instance_state(
                &asset.id,
                InstanceState::Terminated,
                self.state_wait_timeout(),
            )
            .await
        {
            warn!(asset_id = %asset.id, error = %e, "Termination requested but not confirmed");
            output = "termination requested (unconfirmed)".to_string();
        }

        let mut record = self.stored_or_default(asset).await?;
        record.state = InstanceState::Terminated.to_string();
        self.inventory.update_asset(record).await?;

        Ok(success_result(output, HashMap::new()))
    }

    async fn patch(
        &self,
        asset: &AssetTarget,
        params: &HashMap<String, Value>,
    ) -> Result<ActionResult> {
        let request = PatchRequest {
            operation: match params.get("operation").and_then(Value::as_str) {
                Some("scan") => PatchOperation::Scan,
                _ => PatchOperation::Install,
            },
            reboot_policy: match params.get("reboot").and_then(Value::as_str) {
                Some("never") => RebootPolicy::Never,
                Some("always") => RebootPolicy::Always,
                _ => RebootPolicy::IfRequired,
            },
            baseline: params
                .get("baseline")
                .and_then(Value::as_str)
                .map(str::to_string),
            synchronous: params
                .get("synchronous")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };

        let client = self.client_for(asset)?;
        let summary = client.apply_patches(&asset.id, &request).await?;

        // Post-patch compliance is informational; a failed query degrades
        // to "unknown" rather than failing the patch action.
        let compliance = match client.get_patch_status(&asset.id).await {
            Ok(status) => status,
            Err(e) => {
                debug!(asset_id = %asset.id, error = %e, "Patch status query failed");
                PatchCompliance::Unknown
            }
        };

        let mut metadata = HashMap::from([(
            "compliance".to_string(),
            Value::String(compliance.to_string()),
        )]);
        match client.get_patch_compliance_data(&asset.id).await {
            Ok(detail) => {
                metadata.insert("compliance_data".to_string(), detail);
            }
            Err(e) => {
                debug!(asset_id = %asset.id, error = %e, "Patch compliance data query failed");
            }
        }

        let mut result = success_result(summary.output, metadata);
        result.needs_reboot = summary.needs_reboot;
        Ok(result)
    }

    async fn update(
        &self,
        asset: &AssetTarget,
        params: &HashMap<String, Value>,
    ) -> Result<ActionResult> {
        // Metadata-only change against the stored record; no platform call.
        let mut record = self.stored_or_default(asset).await?;
        let mut changed: Vec<String> = Vec::new();

        if let Some(tags) = params.get("tags").and_then(Value::as_object) {
            for (key, value) in tags {
                if let Some(v) = value.as_str() {
                    record.tags.insert(key.clone(), v.to_string());
                }
            }
            changed.push(format!("{} tag(s)", tags.len()));
        }

        if let Some(state) = params.get("state").and_then(Value::as_str) {
            record.state = state.to_string();
            changed.push(format!("state={}", state));
        }

        if changed.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "update of {} carries neither tags nor state",
                asset.id
            )));
        }

        self.inventory.update_asset(record).await?;

        Ok(success_result(
            format!("updated {}", changed.join(", ")),
            HashMap::new(),
        ))
    }

    async fn validate(
        &self,
        asset: &AssetTarget,
        params: &HashMap<String, Value>,
    ) -> Result<ActionResult> {
        let client = self.client_for(asset)?;
        let state = client.get_instance_status(&asset.id).await?;

        let mut metadata = HashMap::from([(
            "instance_state".to_string(),
            Value::String(state.to_string()),
        )]);

        if state != InstanceState::Running {
            return Ok(ActionResult {
                success: false,
                output: String::new(),
                error: Some(format!(
                    "instance {} reports {}, expected running",
                    asset.id, state
                )),
                duration_ms: 0,
                started_at: Utc::now(),
                completed_at: Utc::now(),
                metadata,
                needs_reboot: false,
            });
        }

        // Embedded health checks: one boolean metadata entry per check.
        let checks: Vec<HealthCheckSpec> = match params.get("health_checks") {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                EngineError::InvalidInput(format!("invalid embedded health checks: {}", e))
            })?,
            None => Vec::new(),
        };

        let mut all_passed = true;
        for check in &checks {
            let passed = match self.health.check_with_retry(check).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(asset_id = %asset.id, check = %check.name, error = %e, "Validation check failed");
                    all_passed = false;
                    false
                }
            };
            metadata.insert(format!("check:{}", check.name), Value::Bool(passed));
        }

        if all_passed {
            let mut result = success_result("validation passed".to_string(), HashMap::new());
            result.metadata = metadata;
            Ok(result)
        } else {
            Ok(ActionResult {
                success: false,
                output: String::new(),
                error: Some(format!("validation checks failed for {}", asset.id)),
                duration_ms: 0,
                started_at: Utc::now(),
                completed_at: Utc::now(),
                metadata,
                needs_reboot: false,
            })
        }
    }

    fn client_for(&self, asset: &AssetTarget) -> Result<Arc<dyn PlatformClient>> {
        self.platforms.get(&asset.platform)
    }

    fn state_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.state_wait_timeout_secs)
    }

    async fn stored_or_default(&self, asset: &AssetTarget) -> Result<AssetRecord> {
        Ok(self
            .inventory
            .get_asset(&asset.id)
            .await?
            .unwrap_or_else(|| {
                AssetRecord::new(&asset.id, &asset.name).with_platform(&asset.platform)
            }))
    }

    /// Audit failures are logged and swallowed; they never fail the
    /// primary operation.
    async fn record_activity(
        &self,
        asset: &AssetTarget,
        action: AssetAction,
        success: bool,
        detail: &str,
    ) {
        let activity = ActivityRecord::new(&asset.id, action.to_string(), success, detail);
        if let Err(e) = self.inventory.record_activity(activity).await {
            debug!(asset_id = %asset.id, error = %e, "Failed to record activity");
        }
    }
}

fn success_result(output: String, metadata: HashMap<String, Value>) -> ActionResult {
    let now = Utc::now();
    ActionResult {
        success: true,
        output,
        error: None,
        duration_ms: 0,
        started_at: now,
        completed_at: now,
        metadata,
        needs_reboot: false,
    }
}
