//! Realtime event envelope.
//!
//! Frames are adjacently tagged: the event name goes in `event`, the payload in
//! `data`. Payload-less events (`admin-subscribe`) may omit `data` entirely.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conversation::{Conversation, Message};

// ============================================================================
// Inbound (Client -> Server)
// ============================================================================

/// Events a client may send to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Subscribe to a conversation room. Carries the raw tracking identifier.
    JoinConversation(String),

    /// Customer message; creates the conversation if it does not exist.
    CustomerMessage(CustomerMessage),

    /// Staff reply to an existing conversation.
    StaffMessage(StaffMessage),

    /// Join the admin broadcast room.
    AdminSubscribe,

    /// Ephemeral typing state, relayed to the rest of the room.
    TypingIndicator(TypingIndicator),
}

impl ClientEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinConversation(_) => "join-conversation",
            ClientEvent::CustomerMessage(_) => "customer-message",
            ClientEvent::StaffMessage(_) => "staff-message",
            ClientEvent::AdminSubscribe => "admin-subscribe",
            ClientEvent::TypingIndicator(_) => "typing-indicator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerMessage {
    #[serde(default)]
    pub tracking_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffMessage {
    #[serde(default)]
    pub tracking_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub staff_id: String,
    #[serde(default)]
    pub staff_name: String,
}

/// Typing state for one participant.
///
/// Fields the hub does not understand are kept in `extra` so the relayed
/// payload matches what the sender wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    #[serde(default)]
    pub tracking_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Outbound (Server -> Client)
// ============================================================================

/// Events the hub sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full conversation state, sent only to the connection that joined.
    ChatHistory(Conversation),

    /// A message was appended; sent to the conversation room.
    NewMessage(NewMessage),

    /// Conversation changed; sent to the admin broadcast room.
    ConversationUpdated { conversation: Conversation },

    /// Relayed typing state.
    TypingIndicator(TypingIndicator),

    /// Failure of the sender's own event.
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ChatHistory(_) => "chat-history",
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::ConversationUpdated { .. } => "conversation-updated",
            ServerEvent::TypingIndicator(_) => "typing-indicator",
            ServerEvent::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation: Conversation,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
