//! Presence registry.
//!
//! Records which connection most recently joined each conversation. It is
//! only consulted for cleanup: when a connection goes away every entry that
//! still points at it is removed.

use dashmap::DashMap;
use trackmyorder_protocol::TrackingId;

use super::SessionId;

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<TrackingId, SessionId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `id` at `session`, returning the session it replaced.
    pub fn record(&self, id: TrackingId, session: SessionId) -> Option<SessionId> {
        self.entries.insert(id, session)
    }

    /// Remove every entry referencing `session`. Returns how many were removed.
    pub fn remove_session(&self, session: &SessionId) -> usize {
        let stale: Vec<TrackingId> = self
            .entries
            .iter()
            .filter(|entry| entry.value() == session)
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .iter()
            .filter(|id| {
                self.entries
                    .remove_if(*id, |_, current| current == session)
                    .is_some()
            })
            .count()
    }

    pub fn lookup(&self, id: &TrackingId) -> Option<SessionId> {
        self.entries.get(id).map(|entry| *entry.value())
    }

    /// Whether any entry still references `session`.
    pub fn references(&self, session: &SessionId) -> bool {
        self.entries.iter().any(|entry| entry.value() == session)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
