//! Per-asset action execution.
//!
//! - `AssetProcessor`: runs one action against one asset through the
//!   platform capability contract
//! - `ActionResult`: uniform outcome wrapper

mod processor;

pub use processor::{ActionResult, AssetProcessor};
