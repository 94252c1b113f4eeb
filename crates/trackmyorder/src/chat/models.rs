//! Database rows and query types for conversations.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use trackmyorder_protocol::{Conversation, ConversationStatus, Message, Sender, TrackingId};

use super::store::StoreError;

/// Filter for listing conversations.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
}

impl ConversationFilter {
    pub fn with_status(status: ConversationStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

/// `conversations` row.
#[derive(Debug, Clone, FromRow)]
pub(super) struct ConversationRow {
    pub tracking_id: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub is_unread_by_admin: bool,
    pub last_message_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// `conversation_messages` row.
#[derive(Debug, Clone, FromRow)]
pub(super) struct MessageRow {
    pub tracking_id: String,
    pub sender: String,
    pub message: String,
    pub timestamp: i64,
    pub admin_id: Option<String>,
    pub admin_name: Option<String>,
}

pub(super) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::InvalidRow(format!("timestamp out of range: {}", ms)))
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message, StoreError> {
        let sender: Sender = self.sender.parse().map_err(StoreError::InvalidRow)?;
        Ok(Message {
            sender,
            message: self.message,
            timestamp: from_millis(self.timestamp)?,
            admin_id: self.admin_id,
            admin_name: self.admin_name,
        })
    }
}

impl ConversationRow {
    pub fn into_conversation(self, messages: Vec<Message>) -> Result<Conversation, StoreError> {
        let status: ConversationStatus = self.status.parse().map_err(StoreError::InvalidRow)?;
        Ok(Conversation {
            tracking_id: TrackingId::new(&self.tracking_id),
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            messages,
            status,
            is_unread_by_admin: self.is_unread_by_admin,
            last_message_at: from_millis(self.last_message_at)?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}
