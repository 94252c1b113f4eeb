//! Application state shared across handlers.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::auth::AuthState;
use crate::chat::ConversationStore;
use crate::config::RealtimeConfig;
use crate::ws::Hub;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Conversation persistence.
    pub store: Arc<dyn ConversationStore>,
    /// Realtime hub.
    pub hub: Arc<Hub>,
    /// Authentication state.
    pub auth: AuthState,
    /// Realtime transport settings.
    pub realtime: RealtimeConfig,
}

impl AppState {
    /// Build the state, creating a hub over `store`.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        auth: AuthState,
        realtime: RealtimeConfig,
    ) -> Self {
        let hub = Arc::new(Hub::new(store.clone(), &realtime));
        Self {
            store,
            hub,
            auth,
            realtime,
        }
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
