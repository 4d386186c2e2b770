use serde::{Deserialize, Serialize};

/// Probe type for a health gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Http,
    Tcp,
    Command,
    Dns,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Http => "http",
            Self::Tcp => "tcp",
            Self::Command => "command",
            Self::Dns => "dns",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "tcp" => Ok(Self::Tcp),
            "command" | "cmd" => Ok(Self::Command),
            "dns" => Ok(Self::Dns),
            _ => Err(format!("Invalid check kind: {}", s)),
        }
    }
}

fn default_retries() -> u32 {
    3
}

/// Declarative health check run after a phase's asset processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub name: String,
    pub kind: CheckKind,

    /// URL, host:port, command line, or hostname depending on `kind`.
    pub target: String,

    /// Expected status code, banner/body substring, or resolved address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,

    /// Per-check timeout string, e.g. "30s". Defaults to the checker config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl HealthCheckSpec {
    pub fn new(name: impl Into<String>, kind: CheckKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            expected: None,
            timeout: None,
            retries: default_retries(),
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Outcome of a single (possibly retried) health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    /// Attempt on which the check passed (1-based).
    pub attempts: u32,
}
