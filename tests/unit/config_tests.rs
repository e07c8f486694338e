//! Unit tests for configuration parsing and validation.

use std::io::Write;
use std::time::Duration;

use notice_relay::config::GlobalConfig;
use notice_relay::models::user::Role;
use notice_relay::AppError;

const MINIMAL: &str = r#"
[backend]
base_url = "https://crm.example.test/api"
socket_url = "wss://crm.example.test/socket"
"#;

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str(MINIMAL).expect("valid config");

    assert_eq!(config.backend.request_timeout(), Duration::from_secs(30));
    assert_eq!(config.delivery.post_ack_delay(), Duration::from_millis(500));
    assert_eq!(config.delivery.retry_delay(), Duration::from_millis(1000));
    assert_eq!(config.delivery.max_retry_prompts, None);
    assert_eq!(config.delivery.auto_acknowledge_after(), None);
    assert_eq!(config.channel.initial_backoff(), Duration::from_millis(1000));
    assert_eq!(config.channel.max_backoff(), Duration::from_millis(30_000));
    assert!(config.user.is_none());
}

#[test]
fn full_config_parses_every_section() {
    let raw = r#"
[backend]
base_url = "http://localhost:4000/api"
socket_url = "ws://localhost:4000/socket"
request_timeout_seconds = 5

[delivery]
post_ack_delay_ms = 0
retry_delay_ms = 250
max_retry_prompts = 3
auto_acknowledge_seconds = 120

[channel]
initial_backoff_ms = 200
max_backoff_ms = 4000

[user]
id = "u-17"
name = "Priya"
role = "manager"
"#;
    let config = GlobalConfig::from_toml_str(raw).expect("valid config");

    assert_eq!(config.backend.request_timeout(), Duration::from_secs(5));
    assert!(config.delivery.post_ack_delay().is_zero());
    assert_eq!(config.delivery.max_retry_prompts, Some(3));
    assert_eq!(
        config.delivery.auto_acknowledge_after(),
        Some(Duration::from_secs(120))
    );
    let user = config.user.expect("user section");
    assert_eq!(user.id, "u-17");
    assert_eq!(user.role, Role::Manager);
}

fn expect_config_error(raw: &str, needle: &str) {
    match GlobalConfig::from_toml_str(raw) {
        Err(AppError::Config(msg)) => {
            assert!(msg.contains(needle), "expected '{needle}' in '{msg}'");
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn rejects_non_http_base_url() {
    expect_config_error(
        r#"
[backend]
base_url = "ftp://crm.example.test"
socket_url = "wss://crm.example.test/socket"
"#,
        "base_url",
    );
}

#[test]
fn rejects_non_websocket_socket_url() {
    expect_config_error(
        r#"
[backend]
base_url = "https://crm.example.test/api"
socket_url = "https://crm.example.test/socket"
"#,
        "socket_url",
    );
}

#[test]
fn rejects_zero_auto_acknowledge_timeout() {
    expect_config_error(
        &format!("{MINIMAL}\n[delivery]\nauto_acknowledge_seconds = 0\n"),
        "auto_acknowledge_seconds",
    );
}

#[test]
fn rejects_inverted_backoff_bounds() {
    expect_config_error(
        &format!("{MINIMAL}\n[channel]\ninitial_backoff_ms = 5000\nmax_backoff_ms = 1000\n"),
        "max_backoff_ms",
    );
}

#[test]
fn rejects_missing_backend_section() {
    expect_config_error("[delivery]\nretry_delay_ms = 10\n", "invalid config");
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(MINIMAL.as_bytes()).expect("write");

    let config = GlobalConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.backend.base_url, "https://crm.example.test/api");
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = GlobalConfig::load_from_path(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn credentials_never_print_in_debug_output() {
    let mut config = GlobalConfig::from_toml_str(MINIMAL).expect("valid config");
    config.credentials.access_token = Some("secret-access-token".into());
    config.credentials.session_cookie = Some("sid=secret-cookie".into());

    let rendered = format!("{config:?}");
    assert!(!rendered.contains("secret-access-token"));
    assert!(!rendered.contains("secret-cookie"));
}
