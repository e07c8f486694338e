//! Acknowledgment records and aggregate status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::MessageId;

/// How the user confirmed a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AckMethod {
    /// Explicit confirmation by the user.
    Button,
    /// Implicit confirmation after the presentation timer ran out.
    TimerExpired,
}

impl AckMethod {
    /// Wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::TimerExpired => "timer-expired",
        }
    }
}

/// Body of an acknowledgment submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckRequestBody {
    /// Confirmation method.
    pub method: AckMethod,
}

/// One user's confirmation of one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    /// Acknowledged message.
    pub message_id: MessageId,
    /// Acknowledging user.
    pub user_id: String,
    /// When the backend recorded the confirmation.
    pub acknowledged_at: DateTime<Utc>,
    /// Confirmation method.
    pub method: AckMethod,
}

/// Aggregate acknowledgment view for one message, computed by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgmentStatus {
    /// Number of users the message was delivered to.
    pub total_recipients: u32,
    /// Number of users who acknowledged.
    pub acknowledged_count: u32,
    /// Number of users still to acknowledge.
    pub pending_count: u32,
    /// Individual acknowledgments.
    #[serde(default)]
    pub acknowledgments: Vec<Acknowledgment>,
}

impl AcknowledgmentStatus {
    /// Whether every recipient has acknowledged.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending_count == 0 && self.acknowledged_count >= self.total_recipients
    }

    /// Share of recipients who acknowledged, in `0.0..=1.0`.
    #[must_use]
    pub fn completion_ratio(&self) -> f64 {
        if self.total_recipients == 0 {
            return 1.0;
        }
        (f64::from(self.acknowledged_count) / f64::from(self.total_recipients)).min(1.0)
    }
}
