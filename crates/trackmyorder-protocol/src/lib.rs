//! Wire types for the TrackMyORDER realtime support chat.
//!
//! This crate defines the data model shared by the server and its clients and
//! the event envelope spoken over the websocket:
//!
//! ```text
//! Customer / Staff UI <--[WS: ClientEvent / ServerEvent]--> Realtime Hub <--> Conversation Store
//!                                                               |
//!                                                        admin-dashboard room
//! ```
//!
//! Every frame is a JSON object `{"event": "<name>", "data": <payload>}`. Event
//! names and payload field names are part of the client contract and must not
//! change.

pub mod conversation;
pub mod events;

pub use conversation::{Conversation, ConversationStatus, Message, Sender, TrackingId};
pub use events::{
    ClientEvent, CustomerMessage, ErrorPayload, NewMessage, ServerEvent, StaffMessage,
    TypingIndicator,
};
