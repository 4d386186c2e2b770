//! Execution lifecycle event notification.
//!
//! Callbacks fired on phase start, phase completion, and execution
//! completion:
//! - `ExecutionEvent`: event payload with snapshot fields
//! - `Notifier`: event-log and hook-command delivery

mod events;
mod notifier;

pub use events::{EventType, ExecutionEvent};
pub use notifier::Notifier;
