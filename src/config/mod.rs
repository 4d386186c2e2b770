//! Engine configuration.
//!
//! TOML-backed settings with validation:
//! - `EngineConfig`: top-level container with `load`/`save`
//! - Section structs for engine timing, health defaults, notification,
//!   and the durable store

mod settings;

pub use settings::{
    EngineConfig, EngineSettings, HealthConfig, NotificationConfig, StoreConfig,
};
