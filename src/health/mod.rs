//! Health gates for phase progression.
//!
//! Typed probes with bounded timeouts and capped retry backoff:
//! - `HealthCheckSpec`: declarative check (http, tcp, command, dns)
//! - `HealthChecker`: single-shot and retrying execution

mod checker;
mod types;

pub use checker::HealthChecker;
pub use types::{CheckKind, CheckResult, HealthCheckSpec};
