//! Acknowledgment state machine.
//!
//! [`AckWorkflow`] owns the session's [`DeliveryInbox`] and the single
//! "current" message. It performs no I/O: the session loop in
//! [`super::session`] feeds it events and carries out the side effects it
//! asks for.
//!
//! Transitions follow [`next_state`]:
//!
//! | from       | event     | to         |
//! |------------|-----------|------------|
//! | Idle       | Promote   | Presenting |
//! | Presenting | Submit    | Submitting |
//! | Submitting | Succeeded | Idle       |
//! | Submitting | Failed    | Presenting |

use std::fmt::{Display, Formatter};

use tracing::{debug, info, warn};

use crate::delivery::dedup::Admission;
use crate::delivery::DeliveryInbox;
use crate::models::acknowledgment::AckMethod;
use crate::models::message::{Message, MessageId, MessagePayload};
use crate::{AppError, Result};

/// Workflow state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkflowState {
    /// No current message.
    #[default]
    Idle,
    /// One message is current and shown blocking.
    Presenting,
    /// Acknowledgment of the current message is in flight.
    Submitting,
}

impl Display for WorkflowState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Presenting => "presenting",
            Self::Submitting => "submitting",
        })
    }
}

/// Inputs of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowEvent {
    /// Take the next message from the queue.
    Promote,
    /// Start submitting an acknowledgment.
    Submit,
    /// Backend confirmed the acknowledgment.
    Succeeded,
    /// Submission failed.
    Failed,
}

/// Transition table. `None` means the event is not allowed in `state`.
#[must_use]
pub fn next_state(state: WorkflowState, event: WorkflowEvent) -> Option<WorkflowState> {
    use WorkflowEvent::{Failed, Promote, Submit, Succeeded};
    use WorkflowState::{Idle, Presenting, Submitting};

    match (state, event) {
        (Idle, Promote) => Some(Presenting),
        (Presenting, Submit) => Some(Submitting),
        (Submitting, Succeeded) => Some(Idle),
        (Submitting, Failed) => Some(Presenting),
        _ => None,
    }
}

/// Acknowledgment the session loop must submit to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRequest {
    /// Message being acknowledged.
    pub message_id: MessageId,
    /// Confirmation method.
    pub method: AckMethod,
    /// 1-based submission attempt for this message.
    pub attempt: u32,
}

/// Session-scoped queue, seen-id set, and state machine.
#[derive(Debug, Default)]
pub struct AckWorkflow {
    inbox: DeliveryInbox,
    state: WorkflowState,
    current: Option<Message>,
    cooling_down: bool,
    attempts: u32,
    failures: u32,
    last_method: Option<AckMethod>,
    last_error: Option<String>,
}

impl AckWorkflow {
    /// Fresh workflow in `Idle` with an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a payload to the inbox. Never changes the state by itself.
    pub fn admit(&mut self, payload: MessagePayload) -> Admission {
        let admission = self.inbox.admit(payload);
        if let Admission::Queued(id) = admission {
            debug!(message_id = id, queue_len = self.inbox.queue_len(), "message queued");
        }
        admission
    }

    /// `Idle → Presenting` when a message is waiting and no cooldown runs.
    ///
    /// Takes the highest-priority message out of the queue in the same call,
    /// so two promotions can never pick the same entry.
    pub fn try_promote(&mut self) -> Option<&Message> {
        if self.cooling_down || self.inbox.peek_next().is_none() {
            return None;
        }
        let next = next_state(self.state, WorkflowEvent::Promote)?;
        let message = self.inbox.take_next()?;

        info!(
            message_id = message.id,
            priority = %message.priority,
            remaining = self.inbox.queue_len(),
            "presenting message"
        );
        self.state = next;
        self.attempts = 0;
        self.failures = 0;
        self.last_method = None;
        self.last_error = None;
        self.current = Some(message);
        self.current.as_ref()
    }

    /// `Presenting → Submitting` for the current message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` when no message is presenting, which
    /// is also how a second concurrent submission is refused.
    pub fn begin_submit(&mut self, method: AckMethod) -> Result<AckRequest> {
        let next = self.transition(WorkflowEvent::Submit)?;
        let message_id = self.current_id().ok_or_else(|| {
            AppError::InvalidState("presenting without a current message".into())
        })?;

        self.state = next;
        self.attempts += 1;
        self.last_method = Some(method);
        Ok(AckRequest {
            message_id,
            method,
            attempt: self.attempts,
        })
    }

    /// `Submitting → Idle`: clear the current message and start the cooldown.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` when nothing is submitting or
    /// `message_id` is not the current message.
    pub fn complete_submit(&mut self, message_id: MessageId) -> Result<Message> {
        self.ensure_current(message_id)?;
        let next = self.transition(WorkflowEvent::Succeeded)?;
        let message = self.current.take().ok_or_else(|| {
            AppError::InvalidState("submitting without a current message".into())
        })?;

        info!(message_id, attempts = self.attempts, "message acknowledged");
        self.state = next;
        self.cooling_down = true;
        self.failures = 0;
        self.last_error = None;
        Ok(message)
    }

    /// `Submitting → Presenting`: keep the current message and record the error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` when nothing is submitting or
    /// `message_id` is not the current message.
    pub fn fail_submit(&mut self, message_id: MessageId, error: &AppError) -> Result<()> {
        self.ensure_current(message_id)?;
        let next = self.transition(WorkflowEvent::Failed)?;

        self.failures += 1;
        warn!(message_id, failures = self.failures, %error, "acknowledgment failed");
        self.state = next;
        self.last_error = Some(error.to_string());
        Ok(())
    }

    /// Restart the failure count; used when the user acknowledges again by hand.
    pub fn clear_failures(&mut self) {
        self.failures = 0;
    }

    /// Re-arm promotion after the post-success delay.
    pub fn end_cooldown(&mut self) {
        self.cooling_down = false;
    }

    /// End of session: drop the queue, the seen ids and the current message.
    pub fn reset(&mut self) -> Option<Message> {
        self.inbox.clear();
        self.state = WorkflowState::Idle;
        self.cooling_down = false;
        self.attempts = 0;
        self.failures = 0;
        self.last_method = None;
        self.last_error = None;
        self.current.take()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Message currently presenting or submitting.
    #[must_use]
    pub fn current(&self) -> Option<&Message> {
        self.current.as_ref()
    }

    /// Id of the current message.
    #[must_use]
    pub fn current_id(&self) -> Option<MessageId> {
        self.current.as_ref().map(|m| m.id)
    }

    /// Whether the post-success cooldown is running.
    #[must_use]
    pub fn is_cooling_down(&self) -> bool {
        self.cooling_down
    }

    /// Consecutive failed submissions of the current message.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Method of the last submission of the current message.
    #[must_use]
    pub fn last_method(&self) -> Option<AckMethod> {
        self.last_method
    }

    /// Error of the last failed submission of the current message.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Read access to the inbox.
    #[must_use]
    pub fn inbox(&self) -> &DeliveryInbox {
        &self.inbox
    }

    fn transition(&self, event: WorkflowEvent) -> Result<WorkflowState> {
        next_state(self.state, event).ok_or_else(|| {
            AppError::InvalidState(format!("{event:?} not allowed while {}", self.state))
        })
    }

    fn ensure_current(&self, message_id: MessageId) -> Result<()> {
        match self.current_id() {
            Some(id) if id == message_id => Ok(()),
            Some(id) => Err(AppError::InvalidState(format!(
                "message {message_id} is not current (current is {id})"
            ))),
            None => Err(AppError::InvalidState(format!(
                "message {message_id} is not current (none is)"
            ))),
        }
    }
}
