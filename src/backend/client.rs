//! HTTP client for the dashboard's messaging API.
//!
//! Every request is authorized from the shared [`TokenStore`]. A 401 answer
//! triggers exactly one token refresh followed by one retry of the same
//! request; a second 401 surfaces as `AppError::Unauthorized`.

use std::sync::Arc;

use reqwest::header::COOKIE;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, Credentials};
use crate::models::acknowledgment::{AckMethod, AckRequestBody, AcknowledgmentStatus};
use crate::models::message::{MessageId, MessagePayload, NewBroadcast};
use crate::models::user::SessionUser;
use crate::{AppError, Result};

use super::auth::{RefreshResponse, TokenStore};
use super::{AckBackend, BackendFuture};

/// Authenticated client for the messaging endpoints.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl BackendClient {
    /// Build a client for `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the HTTP client cannot be constructed.
    pub fn new(config: &BackendConfig, credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| AppError::Http(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            tokens: Arc::new(TokenStore::new(credentials)),
        })
    }

    /// Shared token store (the push channel reads the access token from it).
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Messages the current user has not acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the request fails or the body cannot be decoded.
    pub async fn unacknowledged_messages(&self) -> Result<Vec<MessagePayload>> {
        self.get_json("messages/unacknowledged").await
    }

    /// Aggregate acknowledgment status of one message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown message, other `AppError`
    /// variants if the request fails.
    pub async fn message_status(&self, message_id: MessageId) -> Result<AcknowledgmentStatus> {
        self.get_json(&format!("messages/{message_id}/status")).await
    }

    /// Acknowledge a message as the current user. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the request fails.
    pub async fn acknowledge_message(&self, message_id: MessageId, method: AckMethod) -> Result<()> {
        let body = serde_json::to_value(AckRequestBody { method })?;
        let response = self
            .execute(
                Method::POST,
                &format!("messages/{message_id}/acknowledge"),
                Some(&body),
            )
            .await?;
        ensure_envelope_success(response).await
    }

    /// Create a role-targeted broadcast. Returns the created message when the
    /// backend echoes it.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the request fails.
    pub async fn create_broadcast(&self, broadcast: &NewBroadcast) -> Result<Option<MessagePayload>> {
        let body = serde_json::to_value(broadcast)?;
        let response = self
            .execute(Method::POST, "messages/broadcast", Some(&body))
            .await?;
        decode_optional(response).await
    }

    /// Deactivate a message so it is no longer delivered to new sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the request fails.
    pub async fn deactivate_message(&self, message_id: MessageId) -> Result<()> {
        let response = self
            .execute(
                Method::POST,
                &format!("messages/{message_id}/deactivate"),
                None,
            )
            .await?;
        ensure_envelope_success(response).await
    }

    /// Message history for list views.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the request fails or the body cannot be decoded.
    pub async fn message_history(&self) -> Result<Vec<MessagePayload>> {
        self.get_json("messages/history").await
    }

    /// Profile of the authenticated user.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the request fails or the body cannot be decoded.
    pub async fn current_user(&self) -> Result<SessionUser> {
        self.get_json("auth/me").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute(Method::GET, path, None).await?;
        decode_optional(response)
            .await?
            .ok_or_else(|| AppError::Decode(format!("empty response body from {path}")))
    }

    async fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let response = self.send_once(method.clone(), path, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        debug!(path, "backend answered 401; refreshing credentials");
        self.refresh().await?;
        let response = self.send_once(method, path, body).await?;
        check_status(response).await
    }

    async fn send_once(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let mut request = self.http.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let request = self.tokens.authorize(request).await;
        Ok(request.send().await?)
    }

    async fn refresh(&self) -> Result<()> {
        let refresh_token = self.tokens.refresh_token().await;
        let cookie = self.tokens.session_cookie().await;
        if refresh_token.is_none() && cookie.is_none() {
            return Err(AppError::Unauthorized(
                "credentials rejected and nothing to refresh them with".into(),
            ));
        }

        let mut request = self
            .http
            .post(self.url("auth/refresh"))
            .json(&serde_json::json!({ "refreshToken": refresh_token }));
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, "token refresh rejected");
            return Err(AppError::Unauthorized(format!(
                "token refresh failed with {status}"
            )));
        }

        let refreshed: RefreshResponse = decode_optional(response)
            .await?
            .ok_or_else(|| AppError::Decode("empty token refresh response".into()))?;
        self.tokens.apply_refresh(refreshed).await;
        info!("access token refreshed");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl AckBackend for BackendClient {
    fn fetch_unacknowledged(&self) -> BackendFuture<'_, Vec<MessagePayload>> {
        Box::pin(self.unacknowledged_messages())
    }

    fn acknowledge(&self, message_id: MessageId, method: AckMethod) -> BackendFuture<'_, ()> {
        Box::pin(self.acknowledge_message(message_id, method))
    }
}

/// Map non-success statuses to typed errors.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_owned();
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => AppError::Unauthorized(format!("{url}: {body}")),
        StatusCode::NOT_FOUND => AppError::NotFound(format!("{url}: {body}")),
        _ => AppError::Http(format!("{url} returned {status}: {body}")),
    })
}

/// Decode a JSON body, accepting both bare and `{success, data}` enveloped
/// payloads. An empty body decodes to `None`.
async fn decode_optional<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(&text)?;
    unwrap_envelope(value).map(Some)
}

/// Consume a body that carries no data beyond an optional envelope flag.
async fn ensure_envelope_success(response: Response) -> Result<()> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => envelope_failure(&value).map_or(Ok(()), Err),
        // Plain-text bodies such as "OK" carry no failure flag.
        Err(_) => Ok(()),
    }
}

/// Strip the `{success, data}` envelope if present and decode the payload.
///
/// # Errors
///
/// Returns `AppError::Http` for an envelope with `success: false` and
/// `AppError::Decode` if the payload does not match `T`.
pub fn unwrap_envelope<T: DeserializeOwned>(value: Value) -> Result<T> {
    if let Some(err) = envelope_failure(&value) {
        return Err(err);
    }
    let payload = match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(serde_json::from_value(payload)?)
}

fn envelope_failure(value: &Value) -> Option<AppError> {
    let map = value.as_object()?;
    if map.get("success") != Some(&Value::Bool(false)) {
        return None;
    }
    let reason = map
        .get("message")
        .or_else(|| map.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("request unsuccessful");
    Some(AppError::Http(reason.to_owned()))
}
