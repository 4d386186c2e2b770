use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::{AssetStatus, Execution, ExecutionStatus, PhaseExecution, PhaseStatus};
use crate::utils::ratio_to_percent_u8;

/// Aggregated execution metrics persisted with every upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionMetrics {
    pub duration_seconds: u64,
    pub assets_total: usize,
    pub assets_changed: usize,
    pub assets_failed: usize,
    pub assets_skipped: usize,
    pub rollback_triggered: bool,
    pub observed_error_rate: f64,
    pub health_check_failures: u64,
}

impl ExecutionMetrics {
    pub fn from_execution(execution: &Execution) -> Self {
        let mut total = 0usize;
        let mut changed = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;
        let mut health_check_failures = 0u64;

        for phase in &execution.phases {
            health_check_failures += phase
                .metrics
                .get("health_check_failures")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            for asset in &phase.assets {
                total += 1;
                match asset.status {
                    AssetStatus::Completed => changed += 1,
                    AssetStatus::Failed => failed += 1,
                    AssetStatus::Skipped => skipped += 1,
                    AssetStatus::Pending | AssetStatus::Running => {}
                }
            }
        }

        let duration_seconds = match (execution.started_at, execution.completed_at) {
            (Some(start), Some(end)) => (end - start).num_seconds().max(0) as u64,
            (Some(start), None) => (Utc::now() - start).num_seconds().max(0) as u64,
            _ => 0,
        };

        Self {
            duration_seconds,
            assets_total: total,
            assets_changed: changed,
            assets_failed: failed,
            assets_skipped: skipped,
            rollback_triggered: execution.status == ExecutionStatus::RolledBack,
            observed_error_rate: if total > 0 {
                failed as f64 / total as f64
            } else {
                0.0
            },
            health_check_failures,
        }
    }
}

/// Append-only audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub event: String,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(event: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            event: event.into(),
            detail: detail.into(),
        }
    }
}

/// One durable row per execution.
///
/// The durable representation is intentionally coarser than the
/// in-memory one: phase progress is stored as completed/remaining name
/// lists and per-asset detail is not preserved across a reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub task_id: String,
    pub plan_id: String,
    pub environment: String,
    pub initiated_by: String,
    pub current_phase: String,
    pub completed_phases: Vec<String>,
    pub remaining_phases: Vec<String>,
    pub percent_complete: u8,
    pub state: String,
    pub error: Option<String>,
    pub metrics: ExecutionMetrics,
    /// New entries for this write; the store appends them to the stored
    /// array, never replacing it.
    pub audit_log: Vec<AuditEntry>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn from_execution(execution: &Execution, audit_log: Vec<AuditEntry>) -> Self {
        let completed = execution.completed_phase_names();
        let remaining = execution.remaining_phase_names();
        let total = execution.total_phases();

        Self {
            id: execution.id.clone(),
            task_id: execution.task_id.clone(),
            plan_id: execution.plan_id.clone(),
            environment: execution.environment.clone(),
            initiated_by: execution.initiated_by.clone(),
            current_phase: execution
                .current_phase_name()
                .unwrap_or_default()
                .to_string(),
            percent_complete: if total > 0 {
                ratio_to_percent_u8(completed.len() as f64 / total as f64)
            } else {
                0
            },
            completed_phases: completed,
            remaining_phases: remaining,
            state: execution.status.as_str().to_string(),
            error: execution.error.clone(),
            metrics: ExecutionMetrics::from_execution(execution),
            audit_log,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
        }
    }

    /// Rebuilds an execution from the durable row.
    ///
    /// Completed phases come back as completed, remaining phases as
    /// pending; asset-level records are lost by design.
    pub fn to_execution(&self) -> Result<Execution> {
        let status: ExecutionStatus = self.state.parse()?;

        let mut phases: Vec<PhaseExecution> = Vec::new();
        for name in &self.completed_phases {
            phases.push(PhaseExecution::named(name, PhaseStatus::Completed));
        }
        for name in &self.remaining_phases {
            phases.push(PhaseExecution::named(name, PhaseStatus::Pending));
        }

        let current_phase = self.completed_phases.len().min(phases.len().saturating_sub(1));

        Ok(Execution {
            id: self.id.clone(),
            task_id: self.task_id.clone(),
            plan_id: self.plan_id.clone(),
            org_id: String::new(),
            environment: self.environment.clone(),
            status,
            initiated_by: self.initiated_by.clone(),
            created_at: self.started_at.unwrap_or_else(Utc::now),
            started_at: self.started_at,
            completed_at: self.completed_at,
            phases,
            current_phase,
            error: self.error.clone(),
            state_history: Vec::new(),
        })
    }
}
