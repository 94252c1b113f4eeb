//! Realtime hub: room routing, event dispatch and fan-out.

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use trackmyorder_protocol::{
    ClientEvent, Conversation, ConversationStatus, CustomerMessage, Message, NewMessage,
    ServerEvent, StaffMessage, TrackingId, TypingIndicator,
};

use crate::auth::Claims;
use crate::chat::{ConversationStore, StoreError, StoreResult, now_millis};
use crate::config::RealtimeConfig;

use super::SessionId;
use super::presence::PresenceRegistry;
use super::rooms::{ADMIN_ROOM, RoomRegistry, conversation_room};

/// A sender for outbound events to one connection.
pub type EventSender = mpsc::Sender<ServerEvent>;

/// Errors raised while handling one inbound event.
///
/// Always reported to the originating connection only.
#[derive(Debug, Error)]
pub enum HubError {
    /// Missing or empty required field.
    #[error("Invalid message data: {0}")]
    Validation(&'static str),

    /// Conversation does not exist and may not be created by this event.
    #[error("Conversation not found: {0}")]
    NotFound(TrackingId),

    /// Staff credential missing, expired, insufficient or mismatched.
    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    /// Store operation failed.
    #[error("{action}")]
    Persistence {
        action: &'static str,
        #[source]
        source: StoreError,
    },
}

impl HubError {
    fn persistence(action: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| match source {
            StoreError::NotFound(id) => HubError::NotFound(id),
            source => HubError::Persistence { action, source },
        }
    }
}

/// Where an outbound event goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A single connection.
    Session(SessionId),
    /// Every member of a room, optionally excluding one connection.
    Room {
        name: String,
        except: Option<SessionId>,
    },
}

/// One outbound event and its audience.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: Target,
    pub event: ServerEvent,
}

impl Delivery {
    pub fn to_session(session: SessionId, event: ServerEvent) -> Self {
        Self {
            target: Target::Session(session),
            event,
        }
    }

    pub fn to_room(name: impl Into<String>, event: ServerEvent) -> Self {
        Self {
            target: Target::Room {
                name: name.into(),
                except: None,
            },
            event,
        }
    }

    pub fn to_room_except(name: impl Into<String>, except: SessionId, event: ServerEvent) -> Self {
        Self {
            target: Target::Room {
                name: name.into(),
                except: Some(except),
            },
            event,
        }
    }
}

struct Connection {
    tx: EventSender,
    claims: Option<Claims>,
}

/// Hub owning every live connection, the room registry and presence.
///
/// Message events for the same conversation are serialized by a
/// per-conversation lock held across persist and broadcast, so room members
/// see messages in persistence order.
pub struct Hub {
    store: Arc<dyn ConversationStore>,
    connections: DashMap<SessionId, Connection>,
    rooms: RoomRegistry,
    presence: PresenceRegistry,
    conversation_locks: DashMap<TrackingId, Arc<Mutex<()>>>,
    connection_buffer: usize,
    trust_asserted_identity: bool,
}

impl Hub {
    pub fn new(store: Arc<dyn ConversationStore>, config: &RealtimeConfig) -> Self {
        if config.trust_asserted_identity {
            warn!("Realtime hub trusts staff identity asserted in event payloads");
        }

        Self {
            store,
            connections: DashMap::new(),
            rooms: RoomRegistry::new(),
            presence: PresenceRegistry::new(),
            conversation_locks: DashMap::new(),
            connection_buffer: config.connection_buffer.max(1),
            trust_asserted_identity: config.trust_asserted_identity,
        }
    }

    /// Register a new connection, optionally carrying a staff credential.
    ///
    /// Returns the session ID and a receiver for events targeted at it.
    pub fn register(&self, claims: Option<Claims>) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.connection_buffer);
        let session = SessionId::new();
        match &claims {
            Some(c) => info!("Registered connection {} for staff {}", session, c.sub),
            None => info!("Registered connection {}", session),
        }
        self.connections.insert(session, Connection { tx, claims });
        (session, rx)
    }

    /// Tear down a connection: leave every room and drop its presence entries.
    pub fn disconnect(&self, session: &SessionId) {
        let rooms = self.rooms.leave_all(session);
        let presence = self.presence.remove_session(session);
        self.connections.remove(session);
        info!(
            "Connection {} closed (left {} rooms, cleared {} presence entries)",
            session,
            rooms.len(),
            presence
        );
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Handle one inbound event end to end.
    ///
    /// Failures become an `error` event for the sender; the connection stays
    /// usable.
    pub async fn handle_event(&self, session: SessionId, event: ClientEvent) {
        let name = event.name();
        let lock_key = match &event {
            ClientEvent::CustomerMessage(p) => TrackingId::parse(&p.tracking_id),
            ClientEvent::StaffMessage(p) => TrackingId::parse(&p.tracking_id),
            _ => None,
        };

        let Some(id) = lock_key else {
            let deliveries = self.dispatch_or_error(session, event).await;
            self.deliver(deliveries);
            return;
        };

        self.with_conversation_lock(&id, async move {
            let deliveries = self.dispatch_or_error(session, event).await;
            self.deliver(deliveries);
        })
        .await;

        debug!("Handled {} from {}", name, session);
    }

    /// Run `work` while holding the conversation's lock, then prune the lock
    /// entry once nobody else is waiting on it.
    async fn with_conversation_lock<T>(
        &self,
        id: &TrackingId,
        work: impl Future<Output = T>,
    ) -> T {
        let lock = self.conversation_locks.entry(id.clone()).or_default().clone();
        let output = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        self.conversation_locks
            .remove_if(id, |_, l| Arc::strong_count(l) == 1);
        output
    }

    /// Change a conversation's status on behalf of staff and tell the
    /// dashboards, ordered with in-flight messages for the same conversation.
    pub async fn update_status(
        &self,
        id: &TrackingId,
        status: ConversationStatus,
    ) -> StoreResult<Conversation> {
        self.with_conversation_lock(id, async move {
            let conversation = self.store.update_status(id, status).await?;
            self.publish_conversation_update(conversation.clone());
            Ok::<_, StoreError>(conversation)
        })
        .await
    }

    /// Clear the unread flag and tell the dashboards.
    pub async fn mark_read(&self, id: &TrackingId) -> StoreResult<Conversation> {
        self.with_conversation_lock(id, async move {
            let conversation = self.store.mark_read(id).await?;
            self.publish_conversation_update(conversation.clone());
            Ok::<_, StoreError>(conversation)
        })
        .await
    }

    async fn dispatch_or_error(&self, session: SessionId, event: ClientEvent) -> Vec<Delivery> {
        let name = event.name();
        match self.dispatch(session, event).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                match &e {
                    HubError::Persistence { source, .. } => {
                        warn!("{} from {} failed: {}: {}", name, session, e, source)
                    }
                    _ => debug!("{} from {} rejected: {}", name, session, e),
                }
                vec![Delivery::to_session(session, ServerEvent::error(e.to_string()))]
            }
        }
    }

    /// Apply one inbound event and return the events it produces.
    ///
    /// Mutates rooms, presence and the store but sends nothing.
    pub async fn dispatch(
        &self,
        session: SessionId,
        event: ClientEvent,
    ) -> Result<Vec<Delivery>, HubError> {
        match event {
            ClientEvent::JoinConversation(raw) => self.join_conversation(session, &raw).await,
            ClientEvent::CustomerMessage(payload) => self.customer_message(payload).await,
            ClientEvent::StaffMessage(payload) => self.staff_message(session, payload).await,
            ClientEvent::AdminSubscribe => self.admin_subscribe(session),
            ClientEvent::TypingIndicator(payload) => Ok(self.typing_indicator(session, payload)),
        }
    }

    async fn join_conversation(
        &self,
        session: SessionId,
        raw: &str,
    ) -> Result<Vec<Delivery>, HubError> {
        let id = TrackingId::parse(raw).ok_or(HubError::Validation("trackingId is required"))?;

        self.rooms.join(&conversation_room(&id), session);
        self.presence.record(id.clone(), session);
        debug!("Connection {} joined {}", session, conversation_room(&id));

        let existing = self
            .store
            .find_by_tracking_id(&id)
            .await
            .map_err(HubError::persistence("Failed to join conversation"))?;

        Ok(existing
            .map(|conversation| {
                Delivery::to_session(session, ServerEvent::ChatHistory(conversation))
            })
            .into_iter()
            .collect())
    }

    async fn customer_message(&self, payload: CustomerMessage) -> Result<Vec<Delivery>, HubError> {
        let id = TrackingId::parse(&payload.tracking_id)
            .ok_or(HubError::Validation("trackingId is required"))?;
        require(&payload.message, "message is required")?;
        require(&payload.customer_name, "customerName is required")?;

        self.store
            .find_or_create(
                &id,
                &payload.customer_name,
                payload.customer_email.as_deref(),
            )
            .await
            .map_err(HubError::persistence("Failed to send message"))?;

        let message = Message::from_customer(payload.message, now_millis());
        let conversation = self
            .store
            .append_message(&id, &message, true)
            .await
            .map_err(HubError::persistence("Failed to send message"))?;

        info!("Customer message in {}", conversation_room(&id));
        Ok(message_deliveries(conversation, message))
    }

    async fn staff_message(
        &self,
        session: SessionId,
        payload: StaffMessage,
    ) -> Result<Vec<Delivery>, HubError> {
        let id = TrackingId::parse(&payload.tracking_id)
            .ok_or(HubError::Validation("trackingId is required"))?;
        require(&payload.message, "message is required")?;
        require(&payload.staff_id, "staffId is required")?;
        require(&payload.staff_name, "staffName is required")?;

        self.authorize_staff(&session, Some(&payload.staff_id))?;

        // Staff may only answer conversations that already exist.
        if self
            .store
            .find_by_tracking_id(&id)
            .await
            .map_err(HubError::persistence("Failed to send message"))?
            .is_none()
        {
            return Err(HubError::NotFound(id));
        }

        let message = Message::from_staff(
            payload.message,
            payload.staff_id,
            payload.staff_name,
            now_millis(),
        );
        let conversation = self
            .store
            .append_message(&id, &message, false)
            .await
            .map_err(HubError::persistence("Failed to send message"))?;

        info!("Staff message in {}", conversation_room(&id));
        Ok(message_deliveries(conversation, message))
    }

    fn admin_subscribe(&self, session: SessionId) -> Result<Vec<Delivery>, HubError> {
        self.authorize_staff(&session, None)?;
        self.rooms.join(ADMIN_ROOM, session);
        info!("Connection {} joined {}", session, ADMIN_ROOM);
        Ok(Vec::new())
    }

    fn typing_indicator(&self, session: SessionId, payload: TypingIndicator) -> Vec<Delivery> {
        let Some(id) = TrackingId::parse(&payload.tracking_id) else {
            debug!("Dropping typing indicator without trackingId from {}", session);
            return Vec::new();
        };

        vec![Delivery::to_room_except(
            conversation_room(&id),
            session,
            ServerEvent::TypingIndicator(payload),
        )]
    }

    /// Check the connection's own credential before a privileged event.
    fn authorize_staff(
        &self,
        session: &SessionId,
        asserted_staff_id: Option<&str>,
    ) -> Result<(), HubError> {
        if self.trust_asserted_identity {
            return Ok(());
        }

        let claims = self
            .connections
            .get(session)
            .and_then(|c| c.claims.clone())
            .ok_or(HubError::Unauthorized("staff credential required"))?;

        if claims.is_expired_at(Utc::now().timestamp()) {
            return Err(HubError::Unauthorized("staff credential expired"));
        }
        if !claims.can_manage_chats() {
            return Err(HubError::Unauthorized("chat access required"));
        }
        if let Some(staff_id) = asserted_staff_id
            && staff_id.trim() != claims.sub
        {
            return Err(HubError::Unauthorized("staffId does not match credential"));
        }

        Ok(())
    }

    /// Send events to their targets.
    ///
    /// Never blocks: a connection whose buffer is full misses the event.
    pub fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery.target {
                Target::Session(session) => self.send_to(&session, delivery.event),
                Target::Room { name, except } => {
                    for member in self.rooms.members(&name) {
                        if Some(member) != except {
                            self.send_to(&member, delivery.event.clone());
                        }
                    }
                }
            }
        }
    }

    fn send_to(&self, session: &SessionId, event: ServerEvent) {
        let Some(conn) = self.connections.get(session) else {
            return;
        };

        match conn.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    "Connection {} is not keeping up, dropped {} event",
                    session,
                    event.name()
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Connection {} already closed", session);
            }
        }
    }

    fn publish_conversation_update(&self, conversation: Conversation) {
        self.deliver(vec![Delivery::to_room(
            ADMIN_ROOM,
            ServerEvent::ConversationUpdated { conversation },
        )]);
    }
}

fn require(value: &str, error: &'static str) -> Result<(), HubError> {
    if value.trim().is_empty() {
        Err(HubError::Validation(error))
    } else {
        Ok(())
    }
}

/// Room copy first, then the admin feed.
fn message_deliveries(conversation: Conversation, message: Message) -> Vec<Delivery> {
    let room = conversation_room(&conversation.tracking_id);
    vec![
        Delivery::to_room(
            room,
            ServerEvent::NewMessage(NewMessage {
                conversation: conversation.clone(),
                message,
            }),
        ),
        Delivery::to_room(ADMIN_ROOM, ServerEvent::ConversationUpdated { conversation }),
    ]
}
