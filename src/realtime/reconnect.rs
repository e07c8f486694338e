//! Forwards push channel transitions to the message session.
//!
//! Every new connect (counted by [`ChannelStatus::connects`]) is reported as
//! `channel_connected`, which makes the session backfill unacknowledged
//! messages. Coalesced disconnect/connect pairs still count as a reconnect.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::workflow::SessionHandle;

use super::channel::ChannelStatus;

/// Spawn the task relaying status changes into `session`.
#[must_use]
pub fn spawn_reconnect_sync(
    mut status: watch::Receiver<ChannelStatus>,
    session: SessionHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut reported_connects = 0_u64;
            let mut reported_connected = false;

            loop {
                let current = *status.borrow_and_update();
                let reconnected = current.is_connected() && current.connects != reported_connects;
                let dropped = reported_connected && !current.is_connected();

                let delivered = if reconnected {
                    // Missed the drop in between; close the old connection first.
                    let closed = if reported_connected {
                        session.channel_disconnected()
                    } else {
                        Ok(())
                    };
                    debug!(connects = current.connects, "push channel connected");
                    reported_connects = current.connects;
                    reported_connected = true;
                    closed.and_then(|()| session.channel_connected())
                } else if dropped {
                    debug!("push channel disconnected");
                    reported_connected = false;
                    session.channel_disconnected()
                } else {
                    Ok(())
                };

                if delivered.is_err() {
                    info!("message session ended; stopping reconnect sync");
                    break;
                }

                tokio::select! {
                    () = cancel.cancelled() => break,
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        .instrument(info_span!("reconnect_sync")),
    )
}
