//! Session-local priority queue of pending notices.

use crate::models::message::Message;

/// Pending messages ordered by priority, urgent first.
///
/// The queue is re-sorted after every insertion with a stable sort, so
/// messages of equal priority keep their admission order.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    entries: Vec<Message>,
}

impl PriorityQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message and restore priority order.
    pub fn push(&mut self, message: Message) {
        self.entries.push(message);
        self.entries
            .sort_by(|a, b| a.priority.presentation_order(b.priority));
    }

    /// Highest-priority entry, without removing it.
    #[must_use]
    pub fn peek_next(&self) -> Option<&Message> {
        self.entries.first()
    }

    /// Remove and return the highest-priority entry.
    pub fn take_next(&mut self) -> Option<Message> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Number of waiting messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no messages are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waiting messages in presentation order.
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.entries.iter()
    }

    /// Drop every waiting message.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<'a> IntoIterator for &'a PriorityQueue {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
