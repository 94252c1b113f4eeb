//! Realtime hub.
//!
//! ```text
//!   customer / staff clients
//!            │ WebSocket, {"event", "data"} frames
//!   ┌────────▼─────────┐
//!   │    ws_handler    │  one task pair per connection
//!   └────────┬─────────┘
//!            │ ClientEvent
//!   ┌────────▼─────────┐      ┌────────────────────┐
//!   │       Hub        │─────▶│ ConversationStore  │
//!   │ rooms, presence  │      └────────────────────┘
//!   └────────┬─────────┘
//!            │ Delivery (session | room, except)
//!   conversation-{ID} rooms and the admin-dashboard room
//! ```

mod handler;
mod hub;
mod presence;
mod rooms;
mod session;

pub use handler::ws_handler;
pub use hub::{Delivery, EventSender, Hub, HubError, Target};
pub use presence::PresenceRegistry;
pub use rooms::{ADMIN_ROOM, RoomRegistry, conversation_room};
pub use session::SessionId;
