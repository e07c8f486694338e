//! Push channel plumbing.
//!
//! - [`channel`]: in-process hub for frames and connection status.
//! - [`socket`]: WebSocket transport feeding the hub.
//! - [`listener`]: subscribes to notice events for eligible roles.
//! - [`reconnect`]: turns reconnects into session backfills.

pub mod channel;
pub mod listener;
pub mod reconnect;
pub mod socket;

pub use channel::{ChannelStatus, ConnectionState, PushChannel, PushFrame};
pub use listener::{LagCallback, ListenerHandle, MessageCallback, RealtimeListener};
pub use reconnect::spawn_reconnect_sync;
pub use socket::WsPushChannel;
