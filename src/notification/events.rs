use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionRolledBack,
    ExecutionCancelled,
    ExecutionPaused,
    ExecutionResumed,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionStarted => "execution.started",
            Self::ExecutionCompleted => "execution.completed",
            Self::ExecutionFailed => "execution.failed",
            Self::ExecutionRolledBack => "execution.rolled_back",
            Self::ExecutionCancelled => "execution.cancelled",
            Self::ExecutionPaused => "execution.paused",
            Self::ExecutionResumed => "execution.resumed",
            Self::PhaseStarted => "phase.started",
            Self::PhaseCompleted => "phase.completed",
            Self::PhaseFailed => "phase.failed",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFailed | Self::ExecutionRolledBack | Self::PhaseFailed
        )
    }

    pub fn is_execution_level(&self) -> bool {
        matches!(
            self,
            Self::ExecutionStarted
                | Self::ExecutionCompleted
                | Self::ExecutionFailed
                | Self::ExecutionRolledBack
                | Self::ExecutionCancelled
                | Self::ExecutionPaused
                | Self::ExecutionResumed
        )
    }
}

/// Lifecycle event handed to the notifier on phase start/completion and
/// execution completion. Carries the snapshot fields external layers need
/// for workflow signaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_type: EventType,
    pub execution_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<(usize, usize)>,
}

impl ExecutionEvent {
    pub fn new(event_type: EventType, execution_id: impl Into<String>) -> Self {
        Self {
            event_type,
            execution_id: execution_id.into(),
            created_at: Utc::now(),
            phase: None,
            status: None,
            message: None,
            progress: None,
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_progress(mut self, completed: usize, total: usize) -> Self {
        self.progress = Some((completed, total));
        self
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![self.event_type.as_str().to_string()];

        if let Some(phase) = &self.phase {
            parts.push(format!("phase={}", phase));
        }
        if let Some(status) = &self.status {
            parts.push(format!("status={}", status));
        }
        if let Some((completed, total)) = self.progress {
            parts.push(format!("progress={}/{}", completed, total));
        }
        if let Some(msg) = &self.message {
            parts.push(msg.clone());
        }

        parts.join(" ")
    }
}
