//! Shared utility functions.
//!
//! Common helpers used across the codebase:
//! - Duration-string parsing ("30s", "5m", "2h", "100ms")
//! - String truncation (UTF-8 safe, boundary-aware)
//! - Percentage formatting

mod duration;
mod format;
mod string;

pub use duration::parse_duration;
pub use format::ratio_to_percent_u8;
pub use string::truncate_at_boundary;
