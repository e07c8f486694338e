//! Token state shared by backend requests.

use reqwest::header::COOKIE;
use reqwest::RequestBuilder;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::Credentials;

/// Body returned by the token refresh endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    /// Newly issued access token.
    pub access_token: String,
    /// Rotated refresh token, when the backend rotates them.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Current credentials, updated in place after a refresh.
#[derive(Debug, Default)]
pub struct TokenStore {
    inner: RwLock<Credentials>,
}

impl TokenStore {
    /// Wrap the credentials loaded at startup.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: RwLock::new(credentials),
        }
    }

    /// Attach the bearer token, or the session cookie when there is none.
    pub async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let credentials = self.inner.read().await;
        if let Some(token) = credentials.access_token.as_deref() {
            request.bearer_auth(token)
        } else if let Some(cookie) = credentials.session_cookie.as_deref() {
            request.header(COOKIE, cookie)
        } else {
            request
        }
    }

    /// Refresh token, if one is known.
    pub async fn refresh_token(&self) -> Option<String> {
        self.inner.read().await.refresh_token.clone()
    }

    /// Session cookie, if one is known.
    pub async fn session_cookie(&self) -> Option<String> {
        self.inner.read().await.session_cookie.clone()
    }

    /// Current access token, if one is known.
    pub async fn access_token(&self) -> Option<String> {
        self.inner.read().await.access_token.clone()
    }

    /// Store the result of a successful refresh.
    pub async fn apply_refresh(&self, refreshed: RefreshResponse) {
        let mut credentials = self.inner.write().await;
        credentials.access_token = Some(refreshed.access_token);
        if let Some(rotated) = refreshed.refresh_token {
            credentials.refresh_token = Some(rotated);
        }
    }
}
