use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Invalid execution state: expected {expected}, got {actual}")]
    InvalidExecutionState { expected: String, actual: String },

    #[error("Invalid state transition: {from} -> {to} (allowed: {allowed})")]
    InvalidStateTransition {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("No platform client registered for: {0}")]
    PlatformNotRegistered(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    Tool(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Input errors are surfaced immediately and never retried.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
