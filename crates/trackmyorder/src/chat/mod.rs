//! Conversation store.
//!
//! Durable per-tracking-id conversations. The [`ConversationStore`] trait is the
//! seam the realtime hub and the REST handlers depend on;
//! [`ConversationRepository`] is the SQLite implementation.

mod models;
mod repository;
mod store;

pub use models::ConversationFilter;
pub use repository::ConversationRepository;
pub use store::{ConversationStore, StoreError, StoreResult, now_millis};
