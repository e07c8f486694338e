//! Per-session delivery deduplication.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::models::message::{Message, MessageId, MessagePayload};

use super::queue::PriorityQueue;

/// Outcome of offering a payload to the deduplicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New message, now waiting in the queue.
    Queued(MessageId),
    /// Id already seen this session; nothing changed.
    Duplicate(MessageId),
    /// Message was deactivated by its sender; not delivered.
    Inactive(MessageId),
    /// Payload missing its id; dropped.
    Malformed,
}

impl Admission {
    /// Whether the payload entered the queue.
    #[must_use]
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Tracks which message ids already entered the queue this session.
///
/// Ids are never forgotten while the session lives, so a message that was
/// presented and acknowledged is not re-admitted by a later backfill.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<MessageId>,
}

impl Deduplicator {
    /// Create an empty seen-id set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `payload` into `queue` unless it is malformed or already seen.
    pub fn admit(&mut self, payload: MessagePayload, queue: &mut PriorityQueue) -> Admission {
        let Some(id) = payload.id else {
            warn!(priority = %payload.priority, "dropping message without id");
            return Admission::Malformed;
        };

        if self.seen.contains(&id) {
            debug!(message_id = id, "message already admitted this session");
            return Admission::Duplicate(id);
        }

        if !payload.is_active {
            debug!(message_id = id, "skipping inactive message");
            return Admission::Inactive(id);
        }

        let message = match Message::try_from(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(message_id = id, %err, "dropping malformed message");
                return Admission::Malformed;
            }
        };

        self.seen.insert(id);
        queue.push(message);
        Admission::Queued(id)
    }

    /// Whether `id` was admitted this session.
    #[must_use]
    pub fn has_seen(&self, id: MessageId) -> bool {
        self.seen.contains(&id)
    }

    /// Number of distinct ids admitted this session.
    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Forget every id; only used when the session ends.
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
