//! Plan and execution type definitions.
//!
//! Core domain types for plan execution:
//! - `ExecutionPlan` / `ExecutionPhase`: the approved input model
//! - `Execution` / `PhaseExecution` / `AssetExecution`: runtime records
//! - `ExecutionStatus` / `PhaseStatus` / `AssetStatus`: state machines

mod execution;
mod status;
mod types;

pub use execution::{AssetExecution, Execution, PhaseExecution, Progress, StateTransition};
pub use status::{AssetStatus, ExecutionStatus, PhaseStatus};
pub use types::{
    AssetAction, AssetTarget, ExecutionPhase, ExecutionPlan, RollbackPlan, RollbackStrategy,
    ToolAction,
};
