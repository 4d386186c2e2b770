use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::health::HealthCheckSpec;

/// Approved, immutable plan submitted to the engine.
///
/// The engine assumes the plan has already passed policy validation and
/// human approval upstream; only shape-level checks happen here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub task_id: String,
    pub plan_id: String,

    #[serde(default)]
    pub org_id: String,

    #[serde(default)]
    pub user_id: String,

    /// Task-type label, e.g. "drift_fix", "patch_rollout", "dr_drill".
    #[serde(default)]
    pub task_type: String,

    #[serde(default)]
    pub environment: String,

    pub phases: Vec<ExecutionPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackPlan>,
}

impl ExecutionPlan {
    pub fn new(task_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            plan_id: plan_id.into(),
            org_id: String::new(),
            user_id: String::new(),
            task_type: String::new(),
            environment: String::new(),
            phases: Vec::new(),
            rollback: None,
        }
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_phase(mut self, phase: ExecutionPhase) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn with_rollback(mut self, rollback: RollbackPlan) -> Self {
        self.rollback = Some(rollback);
        self
    }
}

/// One ordered rollout wave inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPhase {
    pub name: String,

    #[serde(default)]
    pub assets: Vec<AssetTarget>,

    /// Action applied to every asset in this phase.
    #[serde(default)]
    pub action: AssetAction,

    #[serde(default)]
    pub params: HashMap<String, Value>,

    /// Post-phase wait duration string ("90s", "5m") before the next phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_after: Option<String>,

    /// Non-empty trigger arms auto-rollback when this phase fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_trigger: Option<String>,

    /// Health gates run after asset processing.
    #[serde(default)]
    pub health_checks: Vec<HealthCheckSpec>,

    /// Declarative tool actions run before asset processing.
    #[serde(default)]
    pub tool_actions: Vec<ToolAction>,

    /// Permits this phase to fail without aborting the whole execution.
    #[serde(default)]
    pub continue_on_fail: bool,
}

impl ExecutionPhase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assets: Vec::new(),
            action: AssetAction::default(),
            params: HashMap::new(),
            wait_after: None,
            rollback_trigger: None,
            health_checks: Vec::new(),
            tool_actions: Vec::new(),
            continue_on_fail: false,
        }
    }

    pub fn with_assets(mut self, assets: Vec<AssetTarget>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_asset(mut self, asset: AssetTarget) -> Self {
        self.assets.push(asset);
        self
    }

    pub fn with_action(mut self, action: AssetAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_wait_after(mut self, wait: impl Into<String>) -> Self {
        self.wait_after = Some(wait.into());
        self
    }

    pub fn with_rollback_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.rollback_trigger = Some(trigger.into());
        self
    }

    pub fn with_health_check(mut self, check: HealthCheckSpec) -> Self {
        self.health_checks.push(check);
        self
    }

    pub fn with_tool_action(mut self, action: ToolAction) -> Self {
        self.tool_actions.push(action);
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.continue_on_fail = true;
        self
    }
}

/// A single infrastructure unit targeted by a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetTarget {
    pub id: String,
    pub name: String,

    /// Platform tag selecting the registered backend client.
    #[serde(default)]
    pub platform: String,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AssetTarget {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            platform: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Action applied to each asset of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetAction {
    Reimage,
    Reboot,
    Terminate,
    Patch,
    Update,
    #[default]
    Validate,
}

impl std::fmt::Display for AssetAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Reimage => "reimage",
            Self::Reboot => "reboot",
            Self::Terminate => "terminate",
            Self::Patch => "patch",
            Self::Update => "update",
            Self::Validate => "validate",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AssetAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reimage" => Ok(Self::Reimage),
            "reboot" => Ok(Self::Reboot),
            "terminate" => Ok(Self::Terminate),
            "patch" => Ok(Self::Patch),
            "update" => Ok(Self::Update),
            "validate" => Ok(Self::Validate),
            _ => Err(format!("Invalid asset action: {}", s)),
        }
    }
}

/// Declarative phase-level tool invocation, keyed by registry name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAction {
    pub name: String,

    #[serde(default)]
    pub params: HashMap<String, Value>,
}

impl ToolAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Compensating plan run in reverse order on phase failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
    #[serde(default)]
    pub strategy: RollbackStrategy,

    #[serde(default)]
    pub phases: Vec<ExecutionPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl RollbackPlan {
    pub fn new(strategy: RollbackStrategy) -> Self {
        Self {
            strategy,
            phases: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_phase(mut self, phase: ExecutionPhase) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStrategy {
    Auto,
    Manual,
    #[default]
    None,
}

impl std::fmt::Display for RollbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::None => "none",
        };
        write!(f, "{}", s)
    }
}
