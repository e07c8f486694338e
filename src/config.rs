//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use tracing::warn;

use crate::models::user::SessionUser;
use crate::{AppError, Result};

/// Keychain service under which credentials are stored.
pub const KEYRING_SERVICE: &str = "notice-relay";

/// Backend HTTP and push-channel endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    /// Base URL of the REST API, e.g. `https://crm.example.com/api`.
    pub base_url: String,
    /// WebSocket URL of the push channel.
    pub socket_url: String,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl BackendConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn default_request_timeout() -> u64 {
    30
}

/// Timing of the acknowledgment workflow.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DeliveryConfig {
    /// Pause between a successful acknowledgment and the next presentation.
    #[serde(default = "default_post_ack_delay")]
    pub post_ack_delay_ms: u64,
    /// Pause before re-submitting an acknowledgment the user chose to retry.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Consecutive failures after which the retry prompt is no longer shown;
    /// unset means the user is always asked.
    #[serde(default)]
    pub max_retry_prompts: Option<u32>,
    /// Acknowledge implicitly once a notice has been presented this long.
    #[serde(default)]
    pub auto_acknowledge_seconds: Option<u64>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            post_ack_delay_ms: default_post_ack_delay(),
            retry_delay_ms: default_retry_delay(),
            max_retry_prompts: None,
            auto_acknowledge_seconds: None,
        }
    }
}

impl DeliveryConfig {
    /// Post-success delay as a [`Duration`].
    #[must_use]
    pub fn post_ack_delay(&self) -> Duration {
        Duration::from_millis(self.post_ack_delay_ms)
    }

    /// Retry delay as a [`Duration`].
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Implicit acknowledgment timeout, if configured.
    #[must_use]
    pub fn auto_acknowledge_after(&self) -> Option<Duration> {
        self.auto_acknowledge_seconds.map(Duration::from_secs)
    }
}

fn default_post_ack_delay() -> u64 {
    500
}

fn default_retry_delay() -> u64 {
    1000
}

/// Reconnect behaviour of the push channel.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ChannelConfig {
    /// First reconnect delay.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling reconnect delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl ChannelConfig {
    /// First reconnect delay.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Reconnect delay ceiling.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

/// Tokens used to authenticate against the backend.
///
/// Never read from the TOML file; see [`GlobalConfig::load_credentials`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer access token.
    pub access_token: Option<String>,
    /// Token exchanged for a new access token on 401.
    pub refresh_token: Option<String>,
    /// Session cookie used when no bearer token is available.
    pub session_cookie: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("session_cookie", &self.session_cookie.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Global configuration parsed from `notice-relay.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Backend endpoints.
    pub backend: BackendConfig,
    /// Acknowledgment workflow timing.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Push channel reconnect behaviour.
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Identity to run as; fetched from the backend when absent.
    #[serde(default)]
    pub user: Option<SessionUser>,
    /// Credentials (populated at runtime).
    #[serde(skip)]
    pub credentials: Credentials,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load credentials from OS keychain with env-var fallback.
    ///
    /// Each credential is optional, but either an access token or a session
    /// cookie must be available.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither an access token nor a session
    /// cookie can be found.
    pub async fn load_credentials(&mut self) -> Result<()> {
        let credentials = Credentials {
            access_token: load_credential("access_token", "NOTICE_RELAY_ACCESS_TOKEN").await,
            refresh_token: load_credential("refresh_token", "NOTICE_RELAY_REFRESH_TOKEN").await,
            session_cookie: load_credential("session_cookie", "NOTICE_RELAY_SESSION_COOKIE")
                .await,
        };

        if credentials.access_token.is_none() && credentials.session_cookie.is_none() {
            return Err(AppError::Config(
                "no access token or session cookie found in keychain or environment".into(),
            ));
        }

        self.credentials = credentials;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.backend.base_url)
            .map_err(|err| AppError::Config(format!("backend.base_url invalid: {err}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AppError::Config(
                "backend.base_url must use http or https".into(),
            ));
        }

        let socket = Url::parse(&self.backend.socket_url)
            .map_err(|err| AppError::Config(format!("backend.socket_url invalid: {err}")))?;
        if !matches!(socket.scheme(), "ws" | "wss") {
            return Err(AppError::Config(
                "backend.socket_url must use ws or wss".into(),
            ));
        }

        if self.backend.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "backend.request_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.delivery.auto_acknowledge_seconds == Some(0) {
            return Err(AppError::Config(
                "delivery.auto_acknowledge_seconds must be greater than zero when set".into(),
            ));
        }

        if self.channel.initial_backoff_ms == 0 {
            return Err(AppError::Config(
                "channel.initial_backoff_ms must be greater than zero".into(),
            ));
        }

        if self.channel.max_backoff_ms < self.channel.initial_backoff_ms {
            return Err(AppError::Config(
                "channel.max_backoff_ms must not be below channel.initial_backoff_ms".into(),
            ));
        }

        Ok(())
    }
}

/// Load a single optional credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Option<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await;

    match keychain_result {
        Ok(Ok(value)) if !value.is_empty() => return Some(value),
        Ok(Ok(_)) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Ok(Err(err)) => {
            tracing::debug!(key = keyring_key, ?err, "keychain lookup failed, trying env var");
        }
        Err(err) => {
            warn!(key = keyring_key, %err, "keychain task panicked, trying env var");
        }
    }

    env::var(env_key).ok().filter(|value| !value.is_empty())
}
