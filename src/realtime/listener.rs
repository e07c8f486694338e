//! Realtime listener: push events to the delivery pipeline.
//!
//! Holds a frame subscription only while the channel is connected and the
//! current user's role is one that receives notices. The subscription is
//! renewed on every reconnect and identity change and released when the
//! [`ListenerHandle`] is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::message::{MessagePayload, MessageType};
use crate::models::user::SessionUser;
use crate::policy::routing::RoutePolicy;
use crate::{AppError, Result};

use super::channel::{PushChannel, PushFrame};

/// Event name of role-targeted notices.
pub const BROADCAST_EVENT: &str = "broadcast:message";
/// Event name of user-targeted notices.
pub const INDIVIDUAL_EVENT: &str = "individual:message";

/// Callback receiving every tagged payload.
pub type MessageCallback = Arc<dyn Fn(MessagePayload) + Send + Sync>;

/// Callback run when frames were skipped because the listener fell behind.
pub type LagCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Message class carried by a push event, if it is one the listener handles.
#[must_use]
pub fn message_type_for(event: &str) -> Option<MessageType> {
    match event {
        BROADCAST_EVENT => Some(MessageType::Broadcast),
        INDIVIDUAL_EVENT => Some(MessageType::Individual),
        _ => None,
    }
}

/// Decode a frame into a payload tagged with its class.
///
/// Returns `Ok(None)` for events the listener does not handle.
///
/// # Errors
///
/// Returns `AppError::Decode` if the frame data is not a message object.
pub fn decode_frame(frame: PushFrame) -> Result<Option<MessagePayload>> {
    let Some(message_type) = message_type_for(&frame.event) else {
        return Ok(None);
    };
    let payload: MessagePayload = serde_json::from_value(frame.data)
        .map_err(|err| AppError::Decode(format!("{} payload: {err}", frame.event)))?;
    Ok(Some(payload.tagged(message_type)))
}

/// Builder for the listener task.
pub struct RealtimeListener {
    channel: PushChannel,
    user: watch::Receiver<Option<SessionUser>>,
    callback: MessageCallback,
    on_lagged: Option<LagCallback>,
}

impl RealtimeListener {
    /// Construct a listener (does not subscribe yet).
    #[must_use]
    pub fn new(
        channel: PushChannel,
        user: watch::Receiver<Option<SessionUser>>,
        callback: MessageCallback,
    ) -> Self {
        Self {
            channel,
            user,
            callback,
            on_lagged: None,
        }
    }

    /// Run `on_lagged` with the number of skipped frames whenever the
    /// subscription overflows, so the caller can backfill what was lost.
    #[must_use]
    pub fn on_lagged(mut self, on_lagged: LagCallback) -> Self {
        self.on_lagged = Some(on_lagged);
        self
    }

    /// Spawn the listener task. It stops when `cancel` fires or the returned
    /// handle is dropped.
    #[must_use]
    pub fn spawn(self, cancel: &CancellationToken) -> ListenerHandle {
        let cancel = cancel.child_token();
        let subscribed = Arc::new(AtomicBool::new(false));
        let join_handle = tokio::spawn(
            self.run(cancel.clone(), Arc::clone(&subscribed))
                .instrument(info_span!("realtime_listener")),
        );

        ListenerHandle {
            cancel,
            subscribed,
            join_handle: Some(join_handle),
        }
    }

    async fn run(self, cancel: CancellationToken, subscribed: Arc<AtomicBool>) {
        let Self {
            channel,
            mut user,
            callback,
            on_lagged,
        } = self;
        let mut status = channel.watch_status();

        loop {
            // Drop any previous subscription before deciding on a new one.
            let connected = status.borrow_and_update().is_connected();
            let role = user.borrow_and_update().as_ref().map(|u| u.role.clone());
            let mut frames = if connected && RoutePolicy::subscribes(role.as_ref()) {
                Some(channel.subscribe_frames())
            } else {
                None
            };

            let active = frames.is_some();
            if subscribed.swap(active, Ordering::SeqCst) != active {
                if active {
                    info!(role = ?role.as_ref().map(ToString::to_string), "subscribed to push messages");
                } else {
                    info!(connected, "push message subscription released");
                }
            }

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        subscribed.store(false, Ordering::SeqCst);
                        debug!("realtime listener cancelled");
                        return;
                    }
                    changed = status.changed() => {
                        if changed.is_err() {
                            subscribed.store(false, Ordering::SeqCst);
                            return;
                        }
                        break;
                    }
                    changed = user.changed() => {
                        if changed.is_err() {
                            subscribed.store(false, Ordering::SeqCst);
                            return;
                        }
                        break;
                    }
                    frame = next_frame(&mut frames) => match frame {
                        Ok(frame) => dispatch(frame, &callback),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "listener lagged behind push channel");
                            if let Some(on_lagged) = &on_lagged {
                                on_lagged(skipped);
                            }
                        }
                        Err(RecvError::Closed) => {
                            subscribed.store(false, Ordering::SeqCst);
                            return;
                        }
                    },
                }
            }
        }
    }
}

async fn next_frame(
    frames: &mut Option<broadcast::Receiver<PushFrame>>,
) -> std::result::Result<PushFrame, RecvError> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn dispatch(frame: PushFrame, callback: &MessageCallback) {
    let event = frame.event.clone();
    match decode_frame(frame) {
        Ok(Some(payload)) => {
            debug!(event, message_id = ?payload.id, "push message received");
            callback(payload);
        }
        Ok(None) => debug!(event, "ignoring push event"),
        Err(err) => warn!(event, %err, "dropping undecodable push message"),
    }
}

/// Handle returned from [`RealtimeListener::spawn`].
pub struct ListenerHandle {
    cancel: CancellationToken,
    subscribed: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ListenerHandle {
    /// Whether the listener currently holds a frame subscription.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Stop the listener and wait for its task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
