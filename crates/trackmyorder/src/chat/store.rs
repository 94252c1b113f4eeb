//! Conversation store trait and error types.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use trackmyorder_protocol::{Conversation, ConversationStatus, Message, TrackingId};

use super::models::ConversationFilter;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No conversation for the tracking identifier.
    #[error("Conversation not found: {0}")]
    NotFound(TrackingId),

    /// A stored row could not be mapped back to the data model.
    #[error("invalid stored value: {0}")]
    InvalidRow(String),

    /// Database backend error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Current time at the precision the store keeps (milliseconds).
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Durable conversation persistence.
///
/// Every operation takes an already normalized [`TrackingId`]; callers are
/// responsible for normalizing raw client input.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Exact lookup by tracking identifier.
    async fn find_by_tracking_id(&self, id: &TrackingId) -> StoreResult<Option<Conversation>>;

    /// Return the existing conversation or create an empty one.
    ///
    /// Never creates two conversations for the same identifier, even when
    /// called concurrently. Name and email only apply on creation.
    async fn find_or_create(
        &self,
        id: &TrackingId,
        customer_name: &str,
        customer_email: Option<&str>,
    ) -> StoreResult<Conversation>;

    /// Append `message` and refresh `lastMessageAt`, `isUnreadByAdmin` and
    /// `updatedAt` in one write. Returns the updated conversation.
    async fn append_message(
        &self,
        id: &TrackingId,
        message: &Message,
        unread_by_admin: bool,
    ) -> StoreResult<Conversation>;

    /// All conversations, newest `lastMessageAt` first.
    async fn list_all(&self, filter: ConversationFilter) -> StoreResult<Vec<Conversation>>;

    /// Set the status and clear the unread flag.
    async fn update_status(
        &self,
        id: &TrackingId,
        status: ConversationStatus,
    ) -> StoreResult<Conversation>;

    /// Clear the unread flag.
    async fn mark_read(&self, id: &TrackingId) -> StoreResult<Conversation>;

    /// Remove the conversation and its whole message history.
    async fn delete(&self, id: &TrackingId) -> StoreResult<()>;
}
