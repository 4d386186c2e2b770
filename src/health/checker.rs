use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::types::{CheckKind, CheckResult, HealthCheckSpec};
use crate::config::HealthConfig;
use crate::error::{EngineError, Result};
use crate::utils::{parse_duration, truncate_at_boundary};

/// Executes typed health probes with bounded timeouts and capped retry
/// backoff.
#[derive(Clone)]
pub struct HealthChecker {
    config: HealthConfig,
    http: reqwest::Client,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Runs the probe once, bounded by the spec's timeout (or the
    /// configured default). A failing assertion and a transport failure
    /// both surface as errors.
    pub async fn check(&self, spec: &HealthCheckSpec) -> Result<CheckResult> {
        let timeout = self.check_timeout(spec)?;
        let started = Instant::now();

        let outcome = tokio::time::timeout(timeout, self.dispatch(spec)).await;
        let message = match outcome {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(EngineError::Timeout(format!(
                    "health check '{}' timed out after {}s",
                    spec.name,
                    timeout.as_secs()
                )));
            }
        };

        Ok(CheckResult {
            name: spec.name.clone(),
            success: true,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
            attempts: 1,
        })
    }

    /// Retries `check` with exponential backoff (capped) up to the spec's
    /// retry count, short-circuiting on first success.
    pub async fn check_with_retry(&self, spec: &HealthCheckSpec) -> Result<CheckResult> {
        let attempts = spec.retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.check(spec).await {
                Ok(mut result) => {
                    result.attempts = attempt;
                    if attempt > 1 {
                        debug!(
                            check = %spec.name,
                            attempt,
                            "Health check passed after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    debug!(check = %spec.name, attempt, error = %e, "Health check attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        let last = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        Err(EngineError::HealthCheck(format!(
            "'{}' failed after {} attempts: {}",
            spec.name, attempts, last
        )))
    }

    fn check_timeout(&self, spec: &HealthCheckSpec) -> Result<Duration> {
        match &spec.timeout {
            Some(raw) => parse_duration(raw),
            None => Ok(Duration::from_secs(self.config.default_timeout_secs)),
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.backoff_base_ms);
        let cap = Duration::from_secs(self.config.backoff_cap_secs);
        let exp = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        exp.min(cap)
    }

    async fn dispatch(&self, spec: &HealthCheckSpec) -> Result<String> {
        match spec.kind {
            CheckKind::Http => self.check_http(spec).await,
            CheckKind::Tcp => self.check_tcp(spec).await,
            CheckKind::Command => self.check_command(spec).await,
            CheckKind::Dns => self.check_dns(spec).await,
        }
    }

    async fn check_http(&self, spec: &HealthCheckSpec) -> Result<String> {
        let response = self
            .http
            .get(&spec.target)
            .send()
            .await
            .map_err(|e| EngineError::HealthCheck(format!("GET {} failed: {}", spec.target, e)))?;
        let status = response.status().as_u16();

        match &spec.expected {
            Some(expected) => {
                if let Ok(code) = expected.parse::<u16>() {
                    if status == code {
                        Ok(format!("status {}", status))
                    } else {
                        Err(EngineError::HealthCheck(format!(
                            "{} returned status {}, expected {}",
                            spec.target, status, code
                        )))
                    }
                } else {
                    // Non-numeric expectation: substring match on the body.
                    let body = response.text().await.unwrap_or_default();
                    let body = truncate_at_boundary(&body, self.config.http_body_cap);
                    if body.contains(expected.as_str()) {
                        Ok(format!("status {}, body matched '{}'", status, expected))
                    } else {
                        Err(EngineError::HealthCheck(format!(
                            "{} body did not contain '{}'",
                            spec.target, expected
                        )))
                    }
                }
            }
            None => {
                if status == self.config.default_http_status {
                    Ok(format!("status {}", status))
                } else {
                    Err(EngineError::HealthCheck(format!(
                        "{} returned status {}, expected {}",
                        spec.target, status, self.config.default_http_status
                    )))
                }
            }
        }
    }

    async fn check_tcp(&self, spec: &HealthCheckSpec) -> Result<String> {
        let mut stream = TcpStream::connect(&spec.target).await.map_err(|e| {
            EngineError::HealthCheck(format!("connect {} failed: {}", spec.target, e))
        })?;

        let Some(expected) = &spec.expected else {
            return Ok(format!("connected to {}", spec.target));
        };

        // Many services do not send an unsolicited banner; a read failure
        // or timeout therefore passes the check. Only a banner that was
        // actually read and does not match fails it.
        let mut buf = [0u8; 512];
        let banner_timeout = Duration::from_secs(self.config.banner_timeout_secs);
        match tokio::time::timeout(banner_timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                let banner = String::from_utf8_lossy(&buf[..n]);
                if banner.contains(expected.as_str()) {
                    Ok(format!("banner matched '{}'", expected))
                } else {
                    Err(EngineError::HealthCheck(format!(
                        "{} banner did not contain '{}'",
                        spec.target, expected
                    )))
                }
            }
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                debug!(target = %spec.target, "No banner read; treating connect as success");
                Ok(format!("connected to {} (no banner)", spec.target))
            }
        }
    }

    async fn check_command(&self, spec: &HealthCheckSpec) -> Result<String> {
        let output = tokio::process::Command::new("sh")
            .args(["-c", &spec.target])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::HealthCheck(format!("command spawn failed: {}", e)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(EngineError::HealthCheck(format!(
                "command exited with {}: {}",
                output.status,
                truncate_at_boundary(combined.trim(), 256)
            )));
        }

        if let Some(expected) = &spec.expected {
            if !combined.contains(expected.as_str()) {
                return Err(EngineError::HealthCheck(format!(
                    "command output did not contain '{}'",
                    expected
                )));
            }
        }

        Ok(format!(
            "command succeeded: {}",
            truncate_at_boundary(combined.trim(), 256)
        ))
    }

    async fn check_dns(&self, spec: &HealthCheckSpec) -> Result<String> {
        let addrs: Vec<std::net::IpAddr> =
            tokio::net::lookup_host((spec.target.as_str(), 0u16))
                .await
                .map_err(|e| {
                    EngineError::HealthCheck(format!("resolve {} failed: {}", spec.target, e))
                })?
                .map(|addr| addr.ip())
                .collect();

        if addrs.is_empty() {
            return Err(EngineError::HealthCheck(format!(
                "{} resolved to no addresses",
                spec.target
            )));
        }

        if let Some(expected) = &spec.expected {
            let matched = addrs.iter().any(|ip| ip.to_string() == *expected);
            if !matched {
                warn!(
                    target = %spec.target,
                    expected = %expected,
                    resolved = ?addrs,
                    "Resolved addresses did not include expected"
                );
                return Err(EngineError::HealthCheck(format!(
                    "{} did not resolve to {}",
                    spec.target, expected
                )));
            }
        }

        Ok(format!("{} resolved to {} address(es)", spec.target, addrs.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_with_fast_backoff() -> HealthChecker {
        HealthChecker::new(HealthConfig {
            backoff_base_ms: 5,
            ..HealthConfig::default()
        })
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let checker = HealthChecker::new(HealthConfig {
            backoff_base_ms: 1000,
            backoff_cap_secs: 30,
            ..HealthConfig::default()
        });

        assert_eq!(checker.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(checker.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(checker.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(checker.backoff_delay(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_command_check_success() {
        let checker = checker_with_fast_backoff();
        let spec = HealthCheckSpec::new("echo", CheckKind::Command, "echo healthy");

        let result = checker.check(&spec).await.unwrap();
        assert!(result.success);
        assert!(result.message.contains("healthy"));
    }

    #[tokio::test]
    async fn test_command_check_nonzero_exit_fails() {
        let checker = checker_with_fast_backoff();
        let spec = HealthCheckSpec::new("fail", CheckKind::Command, "exit 3");

        let err = checker.check(&spec).await.unwrap_err();
        assert!(err.to_string().contains("exited"));
    }

    #[tokio::test]
    async fn test_command_check_expected_substring() {
        let checker = checker_with_fast_backoff();
        let matching = HealthCheckSpec::new("svc", CheckKind::Command, "echo service is up")
            .with_expected("is up");
        assert!(checker.check(&matching).await.is_ok());

        let mismatched = HealthCheckSpec::new("svc", CheckKind::Command, "echo service is up")
            .with_expected("is down");
        assert!(checker.check(&mismatched).await.is_err());
    }

    #[tokio::test]
    async fn test_retry_exhaustion_reports_attempt_count() {
        let checker = checker_with_fast_backoff();
        let spec =
            HealthCheckSpec::new("always-down", CheckKind::Command, "exit 1").with_retries(4);

        let err = checker.check_with_retry(&spec).await.unwrap_err();
        assert!(err.to_string().contains("4 attempts"));
    }

    #[tokio::test]
    async fn test_retry_short_circuits_on_success() {
        let checker = checker_with_fast_backoff();
        let spec = HealthCheckSpec::new("up", CheckKind::Command, "true").with_retries(5);

        let result = checker.check_with_retry(&spec).await.unwrap();
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_dns_check_localhost() {
        let checker = checker_with_fast_backoff();
        let spec = HealthCheckSpec::new("local", CheckKind::Dns, "localhost");

        let result = checker.check(&spec).await.unwrap();
        assert!(result.success);
    }
}
