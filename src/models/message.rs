//! Notice message model and its push-channel wire shape.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Backend-assigned message identifier.
pub type MessageId = i64;

/// Delivery class of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Targeted at one or more roles.
    Broadcast,
    /// Targeted at specific user identifiers.
    Individual,
}

impl MessageType {
    /// Wire name of the message class.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Individual => "individual",
        }
    }
}

/// Presentation priority. Variants are declared low-to-high so the derived
/// ordering is `Low < Normal < High < Urgent`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Informational notice.
    Low,
    /// Regular notice.
    #[default]
    Normal,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Urgent,
}

impl Priority {
    /// Wire name of the priority.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    /// Descending comparison used for queue ordering (urgent first).
    #[must_use]
    pub fn presentation_order(self, other: Self) -> Ordering {
        other.cmp(&self)
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(AppError::Config(format!("unknown priority: {other}"))),
        }
    }
}

/// Denormalized reference to whoever sent the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    /// Sender's user identifier; absent for system notices.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Sender's role at send time.
    pub role: String,
}

impl Default for Sender {
    fn default() -> Self {
        Self {
            id: None,
            name: "System".into(),
            role: "system".into(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A notice accepted for delivery. Always carries an id and a type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique, immutable identifier.
    pub id: MessageId,
    /// Delivery class.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Optional short label.
    #[serde(default)]
    pub title: Option<String>,
    /// Text content.
    #[serde(alias = "message")]
    pub body: String,
    /// Presentation priority.
    #[serde(default)]
    pub priority: Priority,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Recipient roles for broadcasts.
    #[serde(default)]
    pub target_roles: Vec<String>,
    /// Recipient users for individual messages.
    #[serde(default)]
    pub target_user_ids: Vec<String>,
    /// Inactive messages are not delivered to new sessions.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Sender reference.
    #[serde(default)]
    pub sender: Sender,
}

impl Message {
    /// Display heading: the title, or a generic label derived from the type.
    #[must_use]
    pub fn heading(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_owned(),
            _ => match self.message_type {
                MessageType::Broadcast => "Announcement".into(),
                MessageType::Individual => "Message".into(),
            },
        }
    }
}

/// Message as it arrives from the push channel or the backend.
///
/// Every field is optional or defaulted; [`Message::try_from`] requires the
/// id and infers a missing type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Identifier; payloads without one are discarded.
    #[serde(default)]
    pub id: Option<MessageId>,
    /// Delivery class; set by the listener from the event name, often
    /// absent from backend responses.
    #[serde(rename = "type", default)]
    pub message_type: Option<MessageType>,
    /// Optional short label.
    #[serde(default)]
    pub title: Option<String>,
    /// Text content.
    #[serde(alias = "message", default)]
    pub body: String,
    /// Presentation priority.
    #[serde(default)]
    pub priority: Priority,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Recipient roles for broadcasts.
    #[serde(default)]
    pub target_roles: Vec<String>,
    /// Recipient users for individual messages.
    #[serde(default)]
    pub target_user_ids: Vec<String>,
    /// Inactive messages are not delivered to new sessions.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Sender reference; `null` and absent both mean the system sender.
    #[serde(default)]
    pub sender: Option<Sender>,
}

impl Default for MessagePayload {
    fn default() -> Self {
        Self {
            id: None,
            message_type: None,
            title: None,
            body: String::new(),
            priority: Priority::default(),
            created_at: None,
            target_roles: Vec::new(),
            target_user_ids: Vec::new(),
            is_active: true,
            sender: None,
        }
    }
}

impl MessagePayload {
    /// Tag the payload with its delivery class.
    #[must_use]
    pub fn tagged(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    /// Delivery class: the tagged one, or inferred from the recipients when
    /// the backend omitted it (user targets mean individual).
    #[must_use]
    pub fn resolved_type(&self) -> MessageType {
        self.message_type.unwrap_or(if self.target_user_ids.is_empty() {
            MessageType::Broadcast
        } else {
            MessageType::Individual
        })
    }
}

impl TryFrom<MessagePayload> for Message {
    type Error = AppError;

    fn try_from(payload: MessagePayload) -> Result<Self> {
        let id = payload
            .id
            .ok_or_else(|| AppError::Malformed("payload has no id".into()))?;
        let message_type = payload.resolved_type();

        Ok(Self {
            id,
            message_type,
            title: payload.title,
            body: payload.body,
            priority: payload.priority,
            created_at: payload.created_at,
            target_roles: payload.target_roles,
            target_user_ids: payload.target_user_ids,
            is_active: payload.is_active,
            sender: payload.sender.unwrap_or_default(),
        })
    }
}

impl From<Message> for MessagePayload {
    fn from(message: Message) -> Self {
        Self {
            id: Some(message.id),
            message_type: Some(message.message_type),
            title: message.title,
            body: message.body,
            priority: message.priority,
            created_at: message.created_at,
            target_roles: message.target_roles,
            target_user_ids: message.target_user_ids,
            is_active: message.is_active,
            sender: Some(message.sender),
        }
    }
}

/// Request body for creating a role-targeted broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewBroadcast {
    /// Optional short label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Text content.
    pub message: String,
    /// Roles that should receive the broadcast.
    pub target_roles: Vec<String>,
    /// Presentation priority.
    pub priority: Priority,
}
