use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use rollwave::config::HealthConfig;
use rollwave::{CheckKind, HealthCheckSpec, HealthChecker};

fn fast_checker() -> HealthChecker {
    HealthChecker::new(HealthConfig {
        backoff_base_ms: 10,
        banner_timeout_secs: 1,
        ..HealthConfig::default()
    })
}

/// Minimal HTTP server: serves the scripted (status, body) responses in
/// order, then repeats the last one.
async fn serve_http(responses: Vec<(u16, &'static str)>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut scripted = responses.into_iter();
        let mut last = (200u16, "");
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let (status, body) = scripted.next().unwrap_or(last);
            last = (status, body);

            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;

            let reason = match status {
                200 => "OK",
                503 => "Service Unavailable",
                _ => "Error",
            };
            let response = format!(
                "HTTP/1.1 {} {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    addr
}

/// TCP server that writes `banner` (possibly empty) to each connection
/// and holds it open briefly.
async fn serve_tcp(banner: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                if !banner.is_empty() {
                    let _ = stream.write_all(banner.as_bytes()).await;
                }
                tokio::time::sleep(Duration::from_millis(1500)).await;
                drop(stream);
            });
        }
    });

    addr
}

#[tokio::test]
async fn test_http_check_passes_on_default_status() {
    let addr = serve_http(vec![(200, "")]).await;
    let checker = fast_checker();

    let spec = HealthCheckSpec::new("web", CheckKind::Http, format!("http://{}/health", addr));
    let result = checker.check(&spec).await.unwrap();
    assert!(result.success);
    assert!(result.message.contains("200"));
}

#[tokio::test]
async fn test_http_check_matches_expected_numeric_status() {
    let addr = serve_http(vec![(503, "")]).await;
    let checker = fast_checker();

    let spec = HealthCheckSpec::new("web", CheckKind::Http, format!("http://{}/", addr))
        .with_expected("503");
    assert!(checker.check(&spec).await.is_ok());

    let mismatched = HealthCheckSpec::new("web", CheckKind::Http, format!("http://{}/", addr))
        .with_expected("200");
    assert!(checker.check(&mismatched).await.is_err());
}

#[tokio::test]
async fn test_http_check_matches_body_substring_when_expected_is_non_numeric() {
    let addr = serve_http(vec![(200, "all systems healthy")]).await;
    let checker = fast_checker();

    let spec = HealthCheckSpec::new("web", CheckKind::Http, format!("http://{}/", addr))
        .with_expected("healthy");
    let result = checker.check(&spec).await.unwrap();
    assert!(result.success);

    let mismatched = HealthCheckSpec::new("web", CheckKind::Http, format!("http://{}/", addr))
        .with_expected("degraded");
    assert!(checker.check(&mismatched).await.is_err());
}

#[tokio::test]
async fn test_http_retry_succeeds_on_third_attempt() {
    // 503 twice, then 200: with five retries the gate opens on attempt 3.
    let addr = serve_http(vec![(503, ""), (503, ""), (200, "")]).await;
    let checker = fast_checker();

    let spec = HealthCheckSpec::new("web", CheckKind::Http, format!("http://{}/health", addr))
        .with_retries(5);

    let result = checker.check_with_retry(&spec).await.unwrap();
    assert!(result.success);
    assert_eq!(result.attempts, 3);
}

#[tokio::test]
async fn test_http_retry_exhaustion_names_attempt_count() {
    let addr = serve_http(vec![(503, "")]).await;
    let checker = fast_checker();

    let spec = HealthCheckSpec::new("web", CheckKind::Http, format!("http://{}/health", addr))
        .with_retries(3);

    let err = checker.check_with_retry(&spec).await.unwrap_err();
    assert!(err.to_string().contains("3 attempts"));
}

#[tokio::test]
async fn test_tcp_check_connects() {
    let addr = serve_tcp("").await;
    let checker = fast_checker();

    let spec = HealthCheckSpec::new("port", CheckKind::Tcp, addr.to_string());
    assert!(checker.check(&spec).await.is_ok());
}

#[tokio::test]
async fn test_tcp_check_banner_match_and_mismatch() {
    let addr = serve_tcp("SSH-2.0-rollwave-test\r\n").await;
    let checker = fast_checker();

    let matching =
        HealthCheckSpec::new("ssh", CheckKind::Tcp, addr.to_string()).with_expected("SSH-2.0");
    assert!(checker.check(&matching).await.is_ok());

    let mismatched =
        HealthCheckSpec::new("ssh", CheckKind::Tcp, addr.to_string()).with_expected("FTP");
    assert!(checker.check(&mismatched).await.is_err());
}

#[tokio::test]
async fn test_tcp_check_missing_banner_does_not_fail() {
    // The service accepts but never sends a banner; connect alone passes.
    let addr = serve_tcp("").await;
    let checker = fast_checker();

    let spec =
        HealthCheckSpec::new("quiet", CheckKind::Tcp, addr.to_string()).with_expected("HELLO");
    let result = checker.check(&spec).await.unwrap();
    assert!(result.success);
    assert!(result.message.contains("no banner"));
}

#[tokio::test]
async fn test_tcp_check_connection_refused_fails() {
    let checker = fast_checker();
    // Reserve a port, then close the listener so the connect is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let spec = HealthCheckSpec::new("down", CheckKind::Tcp, addr.to_string());
    assert!(checker.check(&spec).await.is_err());
}

#[tokio::test]
async fn test_dns_check_resolves_localhost() {
    let checker = fast_checker();
    let spec = HealthCheckSpec::new("local", CheckKind::Dns, "localhost");

    let result = checker.check(&spec).await.unwrap();
    assert!(result.success);
}

#[tokio::test]
async fn test_dns_check_expected_address() {
    let checker = fast_checker();

    let matching = HealthCheckSpec::new("local", CheckKind::Dns, "127.0.0.1")
        .with_expected("127.0.0.1");
    assert!(checker.check(&matching).await.is_ok());

    let mismatched = HealthCheckSpec::new("local", CheckKind::Dns, "127.0.0.1")
        .with_expected("10.9.9.9");
    assert!(checker.check(&mismatched).await.is_err());
}

#[tokio::test]
async fn test_command_check_with_timeout_string() {
    let checker = fast_checker();
    let spec = HealthCheckSpec::new("sleepy", CheckKind::Command, "sleep 5")
        .with_timeout("200ms");

    let err = checker.check(&spec).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
}
