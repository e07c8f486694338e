//! WebSocket transport for the push channel.
//!
//! Frames are JSON text messages shaped as `{"event": ..., "data": ...}`.
//! The access token, when known, travels in the `token` query parameter.
//! Dropped connections are retried with a doubling delay capped at the
//! configured maximum; the delay resets after each successful connect.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backend::auth::TokenStore;
use crate::config::ChannelConfig;
use crate::{AppError, Result};

use super::channel::{ConnectionState, PushChannel, PushFrame};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Dropped,
}

/// Client side of the push channel.
pub struct WsPushChannel {
    socket_url: String,
    tokens: Option<Arc<TokenStore>>,
    hub: PushChannel,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl WsPushChannel {
    /// Transport publishing into `hub`.
    #[must_use]
    pub fn new(socket_url: impl Into<String>, hub: PushChannel, config: &ChannelConfig) -> Self {
        Self {
            socket_url: socket_url.into(),
            tokens: None,
            hub,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }

    /// Authenticate the connection with the store's access token.
    #[must_use]
    pub fn with_tokens(mut self, tokens: Arc<TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Run the connect/read/reconnect loop until `cancel` fires.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel).instrument(info_span!("push_channel")))
    }

    async fn run(self, cancel: CancellationToken) {
        let mut backoff = self.initial_backoff;

        loop {
            self.hub.set_state(ConnectionState::Connecting);
            let url = match self.connect_url().await {
                Ok(url) => url,
                Err(err) => {
                    error!(%err, "cannot build push channel url");
                    break;
                }
            };

            let attempt = tokio::select! {
                () = cancel.cancelled() => break,
                attempt = connect_async(url.as_str()) => attempt,
            };

            match attempt {
                Ok((socket, _response)) => {
                    info!("push channel connected");
                    backoff = self.initial_backoff;
                    self.hub.set_state(ConnectionState::Connected);
                    let end = self.pump(socket, &cancel).await;
                    self.hub.set_state(ConnectionState::Disconnected);
                    if end == SessionEnd::Cancelled {
                        break;
                    }
                    warn!(delay = ?backoff, "push channel dropped; reconnecting");
                }
                Err(err) => {
                    self.hub.set_state(ConnectionState::Disconnected);
                    let err = AppError::from(err);
                    warn!(%err, delay = ?backoff, "push channel connect failed; retrying");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }

        self.hub.set_state(ConnectionState::Disconnected);
        info!("push channel task exiting");
    }

    async fn pump(&self, socket: Socket, cancel: &CancellationToken) -> SessionEnd {
        let (mut write, mut read) = socket.split();
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return SessionEnd::Cancelled;
                }
                next = read.next() => next,
            };

            match next {
                Some(Ok(WsMessage::Text(text))) => self.forward(text.as_str()),
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "push channel closed by server");
                    return SessionEnd::Dropped;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let err = AppError::from(err);
                    warn!(%err, "push channel read failed");
                    return SessionEnd::Dropped;
                }
                None => return SessionEnd::Dropped,
            }
        }
    }

    fn forward(&self, text: &str) {
        match serde_json::from_str::<PushFrame>(text) {
            Ok(frame) => {
                let receivers = self.hub.publish(frame);
                debug!(receivers, "push frame published");
            }
            Err(err) => warn!(%err, "ignoring malformed push frame"),
        }
    }

    async fn connect_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.socket_url)
            .map_err(|err| AppError::Config(format!("invalid socket_url: {err}")))?;
        if let Some(tokens) = &self.tokens {
            if let Some(token) = tokens.access_token().await {
                url.query_pairs_mut().append_pair("token", &token);
            }
        }
        Ok(url)
    }
}
