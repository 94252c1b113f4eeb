//! Test utilities and common setup.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use trackmyorder::api::{self, AppState};
use trackmyorder::auth::{AuthConfig, AuthState, Claims, Role, StaffAccount};
use trackmyorder::chat::{
    ConversationFilter, ConversationRepository, ConversationStore, StoreError, StoreResult,
};
use trackmyorder::config::RealtimeConfig;
use trackmyorder::db::Database;
use trackmyorder::ws::Hub;
use trackmyorder_protocol::{Conversation, ConversationStatus, Message, ServerEvent, TrackingId};

pub const TEST_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";

/// Support agent with the `chats` permission.
pub const AGENT: &str = "agent";
/// Staff member without chat access.
pub const VIEWER: &str = "viewer";

fn staff(id: &str, permissions: &[&str]) -> StaffAccount {
    StaffAccount {
        id: id.to_string(),
        name: format!("{id} name"),
        email: format!("{id}@example.com"),
        role: Role::Staff,
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    }
}

/// Auth config in dev mode with a JWT secret, so both `dev:<id>` and signed
/// tokens work.
pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        dev_mode: true,
        jwt_secret: Some(TEST_SECRET.to_string()),
        dev_staff: vec![staff(AGENT, &["chats"]), staff(VIEWER, &[])],
        ..AuthConfig::default()
    }
}

pub fn test_auth() -> AuthState {
    AuthState::new(test_auth_config())
}

/// Claims for a configured dev staff member.
pub fn claims_for(id: &str) -> Claims {
    test_auth()
        .validate_token(&format!("dev:{id}"))
        .unwrap()
}

pub async fn test_store() -> Arc<dyn ConversationStore> {
    let db = Database::in_memory().await.unwrap();
    Arc::new(ConversationRepository::new(db.pool().clone()))
}

/// Store that errors on every call while failing is switched on, and passes
/// through to an in-memory repository otherwise.
pub struct FailingStore {
    inner: Arc<dyn ConversationStore>,
    failing: AtomicBool,
}

impl FailingStore {
    pub async fn new() -> Self {
        Self {
            inner: test_store().await,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConversationStore for FailingStore {
    async fn find_by_tracking_id(&self, id: &TrackingId) -> StoreResult<Option<Conversation>> {
        self.check()?;
        self.inner.find_by_tracking_id(id).await
    }

    async fn find_or_create(
        &self,
        id: &TrackingId,
        customer_name: &str,
        customer_email: Option<&str>,
    ) -> StoreResult<Conversation> {
        self.check()?;
        self.inner.find_or_create(id, customer_name, customer_email).await
    }

    async fn append_message(
        &self,
        id: &TrackingId,
        message: &Message,
        unread_by_admin: bool,
    ) -> StoreResult<Conversation> {
        self.check()?;
        self.inner.append_message(id, message, unread_by_admin).await
    }

    async fn list_all(&self, filter: ConversationFilter) -> StoreResult<Vec<Conversation>> {
        self.check()?;
        self.inner.list_all(filter).await
    }

    async fn update_status(
        &self,
        id: &TrackingId,
        status: ConversationStatus,
    ) -> StoreResult<Conversation> {
        self.check()?;
        self.inner.update_status(id, status).await
    }

    async fn mark_read(&self, id: &TrackingId) -> StoreResult<Conversation> {
        self.check()?;
        self.inner.mark_read(id).await
    }

    async fn delete(&self, id: &TrackingId) -> StoreResult<()> {
        self.check()?;
        self.inner.delete(id).await
    }
}

/// Hub over a fresh in-memory store.
pub async fn test_hub() -> (Arc<Hub>, Arc<dyn ConversationStore>) {
    test_hub_with(RealtimeConfig::default()).await
}

pub async fn test_hub_with(config: RealtimeConfig) -> (Arc<Hub>, Arc<dyn ConversationStore>) {
    let store = test_store().await;
    let hub = Arc::new(Hub::new(store.clone(), &config));
    (hub, store)
}

pub async fn test_state() -> AppState {
    AppState::new(test_store().await, test_auth(), RealtimeConfig::default())
}

/// Create a test application and keep its state for direct inspection.
pub async fn test_app() -> (Router, AppState) {
    let state = test_state().await;
    (api::create_router(state.clone()), state)
}

/// Everything currently queued for a connection.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
