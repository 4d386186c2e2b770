use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::{AssetStatus, ExecutionStatus, PhaseStatus};
use super::types::{ExecutionPhase, ExecutionPlan};
use crate::error::{EngineError, Result};
use crate::utils::ratio_to_percent_u8;

/// One runtime attempt to carry out an approved plan.
///
/// Owned exclusively by its background task once started; readers observe
/// snapshots through the engine registry. Immutable after reaching a
/// terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub task_id: String,
    pub plan_id: String,

    #[serde(default)]
    pub org_id: String,

    #[serde(default)]
    pub environment: String,

    pub status: ExecutionStatus,
    pub initiated_by: String,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub phases: Vec<PhaseExecution>,

    /// Index of the currently active phase. Only increases while running.
    #[serde(default)]
    pub current_phase: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub state_history: Vec<StateTransition>,
}

impl Execution {
    pub fn from_plan(plan: &ExecutionPlan, initiated_by: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: plan.task_id.clone(),
            plan_id: plan.plan_id.clone(),
            org_id: plan.org_id.clone(),
            environment: plan.environment.clone(),
            status: ExecutionStatus::Pending,
            initiated_by: initiated_by.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            phases: plan.phases.iter().map(PhaseExecution::from_phase).collect(),
            current_phase: 0,
            error: None,
            state_history: Vec::new(),
        }
    }

    /// Fixed at creation; always equals `phases.len()`.
    pub fn total_phases(&self) -> usize {
        self.phases.len()
    }

    /// Validated state transition with history recording.
    pub fn transition(&mut self, to: ExecutionStatus, reason: impl Into<String>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            let allowed = self
                .status
                .allowed_transitions()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(EngineError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
                allowed,
            });
        }

        self.state_history
            .push(StateTransition::new(self.status, to, reason));
        self.status = to;
        Ok(())
    }

    /// Advances `current_phase` without ever moving it backwards.
    pub fn advance_to_phase(&mut self, index: usize) {
        if index > self.current_phase {
            self.current_phase = index;
        }
    }

    pub fn current_phase_name(&self) -> Option<&str> {
        self.phases.get(self.current_phase).map(|p| p.name.as_str())
    }

    pub fn completed_phase_names(&self) -> Vec<String> {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed || p.status == PhaseStatus::RolledBack)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn remaining_phase_names(&self) -> Vec<String> {
        self.phases
            .iter()
            .filter(|p| !p.status.is_terminal())
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn progress(&self) -> Progress {
        let total = self.phases.len();
        let completed = self
            .phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed || p.status == PhaseStatus::RolledBack)
            .count();

        Progress {
            completed,
            total,
            percentage: if total > 0 {
                ratio_to_percent_u8(completed as f64 / total as f64)
            } else {
                0
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Recorded state machine transition, appended on every status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: ExecutionStatus, to: ExecutionStatus, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// Runtime record for one phase of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub name: String,
    pub status: PhaseStatus,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Set while the engine sleeps between this phase and the next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<DateTime<Utc>>,

    #[serde(default)]
    pub assets: Vec<AssetExecution>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub metrics: HashMap<String, Value>,
}

impl PhaseExecution {
    pub fn from_phase(phase: &ExecutionPhase) -> Self {
        Self {
            name: phase.name.clone(),
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            wait_until: None,
            assets: phase
                .assets
                .iter()
                .map(|a| AssetExecution::new(&a.id, &a.name))
                .collect(),
            error: None,
            metrics: HashMap::new(),
        }
    }

    /// Creates a bare pending phase record, used when rebuilding from the
    /// durable representation where asset detail is not preserved.
    pub fn named(name: impl Into<String>, status: PhaseStatus) -> Self {
        Self {
            name: name.into(),
            status,
            started_at: None,
            completed_at: None,
            wait_until: None,
            assets: Vec::new(),
            error: None,
            metrics: HashMap::new(),
        }
    }

    pub fn start(&mut self) {
        self.status = PhaseStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = PhaseStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = PhaseStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn mark_rolled_back(&mut self) {
        self.status = PhaseStatus::RolledBack;
    }

    pub fn record_metric(&mut self, key: impl Into<String>, value: Value) {
        self.metrics.insert(key.into(), value);
    }
}

/// Runtime record for one asset inside one phase.
///
/// Transitions pending -> running -> terminal exactly once; an asset
/// execution is never re-entered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetExecution {
    pub asset_id: String,
    pub asset_name: String,
    pub status: AssetStatus,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssetExecution {
    pub fn new(asset_id: impl Into<String>, asset_name: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            asset_name: asset_name.into(),
            status: AssetStatus::Pending,
            started_at: None,
            completed_at: None,
            output: String::new(),
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = AssetStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, output: impl Into<String>) {
        self.status = AssetStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.output = output.into();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = AssetStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = AssetStatus::Skipped;
        self.completed_at = Some(Utc::now());
        self.output = format!("Skipped: {}", reason.into());
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}% ({}/{})",
            self.percentage, self.completed, self.total
        )
    }
}
