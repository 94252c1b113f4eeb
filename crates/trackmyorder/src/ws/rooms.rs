//! Room membership.

use dashmap::DashMap;
use std::collections::HashSet;
use trackmyorder_protocol::TrackingId;

use super::SessionId;

/// Room that receives a copy of every conversation update.
pub const ADMIN_ROOM: &str = "admin-dashboard";

/// Room name for one conversation.
pub fn conversation_room(id: &TrackingId) -> String {
    format!("conversation-{}", id)
}

/// Named broadcast groups, owned by the hub.
///
/// Keeps both directions so a disconnect can leave every room without
/// scanning all of them.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// Room name -> member sessions
    members: DashMap<String, HashSet<SessionId>>,

    /// Session -> rooms it belongs to
    memberships: DashMap<SessionId, HashSet<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `session` to `room`. Joining twice is a no-op.
    pub fn join(&self, room: &str, session: SessionId) {
        self.members
            .entry(room.to_string())
            .or_default()
            .insert(session);
        self.memberships
            .entry(session)
            .or_default()
            .insert(room.to_string());
    }

    /// Remove `session` from every room. Returns the rooms it left.
    pub fn leave_all(&self, session: &SessionId) -> Vec<String> {
        let Some((_, rooms)) = self.memberships.remove(session) else {
            return Vec::new();
        };

        for room in &rooms {
            if let Some(mut members) = self.members.get_mut(room) {
                members.remove(session);
            }
            self.members.remove_if(room, |_, members| members.is_empty());
        }

        rooms.into_iter().collect()
    }

    /// Current members of `room`.
    pub fn members(&self, room: &str) -> Vec<SessionId> {
        self.members
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &str, session: &SessionId) -> bool {
        self.members
            .get(room)
            .map(|m| m.contains(session))
            .unwrap_or(false)
    }

    /// Rooms `session` currently belongs to.
    pub fn rooms_of(&self, session: &SessionId) -> Vec<String> {
        self.memberships
            .get(session)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_room_name() {
        let id = TrackingId::new("trk-abc123xyz0");
        assert_eq!(conversation_room(&id), "conversation-TRK-ABC123XYZ0");
    }

    #[test]
    fn test_join_is_idempotent() {
        let rooms = RoomRegistry::new();
        let a = SessionId::new();

        rooms.join("conversation-X", a);
        rooms.join("conversation-X", a);

        assert_eq!(rooms.members("conversation-X"), vec![a]);
        assert_eq!(rooms.rooms_of(&a), vec!["conversation-X".to_string()]);
    }

    #[test]
    fn test_leave_all_drops_empty_rooms() {
        let rooms = RoomRegistry::new();
        let a = SessionId::new();
        let b = SessionId::new();

        rooms.join("conversation-X", a);
        rooms.join(ADMIN_ROOM, a);
        rooms.join("conversation-X", b);

        let mut left = rooms.leave_all(&a);
        left.sort();
        assert_eq!(left, vec![ADMIN_ROOM.to_string(), "conversation-X".to_string()]);

        assert!(!rooms.is_member("conversation-X", &a));
        assert!(rooms.is_member("conversation-X", &b));
        assert_eq!(rooms.room_count(), 1);
        assert!(rooms.leave_all(&a).is_empty());
    }
}
