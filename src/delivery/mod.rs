//! Message intake: deduplication in front of the priority queue.

pub mod dedup;
pub mod queue;

use crate::models::message::{Message, MessageId, MessagePayload};

use self::dedup::{Admission, Deduplicator};
use self::queue::PriorityQueue;

/// Seen-id set and priority queue owned together by one session.
#[derive(Debug, Default)]
pub struct DeliveryInbox {
    dedup: Deduplicator,
    queue: PriorityQueue,
}

impl DeliveryInbox {
    /// Create an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a payload; see [`Deduplicator::admit`].
    pub fn admit(&mut self, payload: MessagePayload) -> Admission {
        self.dedup.admit(payload, &mut self.queue)
    }

    /// Highest-priority waiting message.
    #[must_use]
    pub fn peek_next(&self) -> Option<&Message> {
        self.queue.peek_next()
    }

    /// Remove the highest-priority waiting message.
    pub fn take_next(&mut self) -> Option<Message> {
        self.queue.take_next()
    }

    /// Whether `id` was admitted this session.
    #[must_use]
    pub fn has_seen(&self, id: MessageId) -> bool {
        self.dedup.has_seen(id)
    }

    /// Number of waiting messages.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of distinct ids admitted this session.
    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.dedup.seen_count()
    }

    /// Ids of the waiting messages in presentation order.
    #[must_use]
    pub fn queued_ids(&self) -> Vec<MessageId> {
        self.queue.iter().map(|m| m.id).collect()
    }

    /// End of session: drop queue and seen ids.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.dedup.clear();
    }
}
