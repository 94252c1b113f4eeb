//! Conversation data model.
//!
//! A conversation is the durable chat thread bound to one tracking identifier.
//! Messages are embedded in it and have no lifecycle of their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized tracking identifier.
///
/// Construction trims surrounding whitespace and uppercases the value, so two
/// identifiers that differ only in case always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(String);

impl TrackingId {
    /// Normalize a raw identifier as received from a client.
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    /// Parse a raw identifier, rejecting values that are empty after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let id = Self::new(raw);
        if id.0.is_empty() { None } else { Some(id) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TrackingId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The customer holding the tracking identifier.
    User,
    /// A staff member.
    Admin,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "admin" => Ok(Sender::Admin),
            _ => Err(format!("unknown sender: {}", s)),
        }
    }
}

/// Conversation lifecycle state. Only staff change it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Resolved,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Resolved => "resolved",
            ConversationStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ConversationStatus::Active),
            "resolved" => Ok(ConversationStatus::Resolved),
            "closed" => Ok(ConversationStatus::Closed),
            _ => Err(format!("invalid status: {}", s)),
        }
    }
}

/// A single chat message embedded in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: Sender,
    pub message: String,
    /// Assigned by the server when the message is appended.
    pub timestamp: DateTime<Utc>,
    /// Staff member id, only for `Sender::Admin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
    /// Staff member display name, only for `Sender::Admin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_name: Option<String>,
}

impl Message {
    /// A customer-authored message stamped with `timestamp`.
    pub fn from_customer(body: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: Sender::User,
            message: body.into().trim().to_string(),
            timestamp,
            admin_id: None,
            admin_name: None,
        }
    }

    /// A staff-authored message stamped with `timestamp`.
    pub fn from_staff(
        body: impl Into<String>,
        admin_id: impl Into<String>,
        admin_name: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender: Sender::Admin,
            message: body.into().trim().to_string(),
            timestamp,
            admin_id: Some(admin_id.into()),
            admin_name: Some(admin_name.into()),
        }
    }
}

/// The durable chat thread for one tracking identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub tracking_id: TrackingId,
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    /// Chronological, append-only.
    pub messages: Vec<Message>,
    pub status: ConversationStatus,
    pub is_unread_by_admin: bool,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}
