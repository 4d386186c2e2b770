//! rollwave: plan execution engine for fleet remediation and rollout.
//!
//! Takes an approved, multi-phase remediation/rollout plan and drives it
//! to completion across heterogeneous compute platforms: sequential
//! phases with health gating, per-asset actions through pluggable
//! platform backends, automatic rollback, cancellation/timeout-bound
//! background work, and durable execution state.

pub mod asset;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod inventory;
pub mod notification;
pub mod plan;
pub mod platform;
pub mod store;
pub mod tool;
pub mod utils;

pub use asset::{ActionResult, AssetProcessor};
pub use config::EngineConfig;
pub use engine::{CancelToken, ExecutionEngine};
pub use error::{EngineError, Result};
pub use health::{CheckKind, CheckResult, HealthChecker, HealthCheckSpec};
pub use inventory::{ActivityRecord, AssetInventory, AssetRecord, MemoryInventory};
pub use notification::{EventType, ExecutionEvent, Notifier};
pub use plan::{
    AssetAction, AssetExecution, AssetStatus, AssetTarget, Execution, ExecutionPhase,
    ExecutionPlan, ExecutionStatus, PhaseExecution, PhaseStatus, Progress, RollbackPlan,
    RollbackStrategy, ToolAction,
};
pub use platform::{
    InstanceState, PatchCompliance, PatchOperation, PatchRequest, PatchSummary, PlatformClient,
    PlatformRegistry, RebootPolicy,
};
pub use store::{
    AuditEntry, ExecutionMetrics, ExecutionRecord, ExecutionStore, MemoryExecutionStore,
    SqliteExecutionStore,
};
pub use tool::{ToolInvoker, ToolRegistry};
