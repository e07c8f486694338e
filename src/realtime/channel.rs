//! In-process hub between the push transport and its subscribers.
//!
//! The transport publishes raw frames and connection transitions here; the
//! listener and the reconnect sync consume them. Tests drive the hub
//! directly instead of a socket.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Frames may arrive.
    Connected,
}

/// Connection state plus the number of successful connects so far.
///
/// The counter lets observers notice a reconnect even when a quick
/// disconnect/connect pair is coalesced into one observed change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Incremented on every transition into [`ConnectionState::Connected`].
    pub connects: u64,
}

impl ChannelStatus {
    /// Whether frames may arrive.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Named event with a JSON payload, as carried by the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    /// Event name, e.g. `broadcast:message`.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl PushFrame {
    /// Build a frame from an event name and payload.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Cloneable hub for frames and connection status.
#[derive(Debug, Clone)]
pub struct PushChannel {
    frames: broadcast::Sender<PushFrame>,
    status: Arc<watch::Sender<ChannelStatus>>,
}

impl PushChannel {
    /// Hub buffering up to `capacity` frames per slow subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        let (status, _) = watch::channel(ChannelStatus::default());
        Self {
            frames,
            status: Arc::new(status),
        }
    }

    /// Deliver a frame to current subscribers.
    ///
    /// Returns how many subscribers received it; with none the frame is
    /// dropped, which is how an unsubscribed listener misses nothing it
    /// should have seen.
    pub fn publish(&self, frame: PushFrame) -> usize {
        self.frames.send(frame).unwrap_or(0)
    }

    /// Record a connection state transition.
    pub fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            if state == ConnectionState::Connected {
                status.connects += 1;
            }
            status.state = state;
            true
        });
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    /// Receiver observing status transitions.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    /// New frame subscription; sees only frames published after this call.
    #[must_use]
    pub fn subscribe_frames(&self) -> broadcast::Receiver<PushFrame> {
        self.frames.subscribe()
    }

    /// Number of live frame subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.frames.receiver_count()
    }
}

impl Default for PushChannel {
    fn default() -> Self {
        Self::new(256)
    }
}
