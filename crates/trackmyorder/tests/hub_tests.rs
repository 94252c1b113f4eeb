//! Realtime hub integration tests.
//!
//! Events are fed straight into the hub and the per-connection receivers are
//! inspected, so no network is involved.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use trackmyorder::auth::Claims;
use trackmyorder::chat::{ConversationFilter, ConversationStore, StoreError, now_millis};
use trackmyorder::config::RealtimeConfig;
use trackmyorder::ws::{ADMIN_ROOM, Hub, conversation_room};
use trackmyorder_protocol::{
    ClientEvent, ConversationStatus, CustomerMessage, Message, Sender, ServerEvent, StaffMessage,
    TrackingId, TypingIndicator,
};

mod common;
use common::{AGENT, FailingStore, VIEWER, claims_for, drain, test_hub, test_hub_with};

fn customer(tracking_id: &str, message: &str, name: &str) -> ClientEvent {
    ClientEvent::CustomerMessage(CustomerMessage {
        tracking_id: tracking_id.to_string(),
        message: message.to_string(),
        customer_name: name.to_string(),
        customer_email: None,
    })
}

fn staff_reply(tracking_id: &str, message: &str, staff_id: &str) -> ClientEvent {
    ClientEvent::StaffMessage(StaffMessage {
        tracking_id: tracking_id.to_string(),
        message: message.to_string(),
        staff_id: staff_id.to_string(),
        staff_name: "Support Agent".to_string(),
    })
}

fn join(tracking_id: &str) -> ClientEvent {
    ClientEvent::JoinConversation(tracking_id.to_string())
}

fn error_message(event: &ServerEvent) -> &str {
    match event {
        ServerEvent::Error(e) => &e.message,
        other => panic!("expected error event, got {}", other.name()),
    }
}

#[tokio::test]
async fn test_join_is_case_insensitive() {
    let (hub, _store) = test_hub().await;
    let (writer, _writer_rx) = hub.register(None);
    hub.handle_event(writer, customer("trk-case01", "hello", "Jane"))
        .await;

    for raw in ["trk-case01", "TRK-CASE01", "Trk-Case01", "  trk-CASE01 "] {
        let (session, mut rx) = hub.register(None);
        hub.handle_event(session, join(raw)).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1, "join with {raw:?}");
        match &events[0] {
            ServerEvent::ChatHistory(conversation) => {
                assert_eq!(conversation.tracking_id.as_str(), "TRK-CASE01");
                assert_eq!(conversation.messages.len(), 1);
            }
            other => panic!("expected chat-history, got {}", other.name()),
        }
        assert!(
            hub.rooms()
                .is_member("conversation-TRK-CASE01", &session)
        );
    }
}

#[tokio::test]
async fn test_customer_messages_append_in_order() {
    let (hub, store) = test_hub().await;
    let (session, _rx) = hub.register(None);

    let bodies = ["first", "second", "third", "fourth", "fifth"];
    for body in bodies {
        hub.handle_event(session, customer("trk-order", body, "Jane"))
            .await;
    }

    let conversation = store
        .find_by_tracking_id(&TrackingId::new("trk-order"))
        .await
        .unwrap()
        .unwrap();

    let stored: Vec<&str> = conversation
        .messages
        .iter()
        .map(|m| m.message.as_str())
        .collect();
    assert_eq!(stored, bodies);
    assert!(conversation.messages.iter().all(|m| m.sender == Sender::User));
    assert!(conversation.is_unread_by_admin);
    assert_eq!(
        conversation.last_message_at,
        conversation.last_message().unwrap().timestamp
    );
}

#[tokio::test]
async fn test_staff_message_to_missing_conversation_is_not_found() {
    let (hub, store) = test_hub().await;
    let (session, mut rx) = hub.register(Some(claims_for(AGENT)));

    hub.handle_event(session, staff_reply("trk-missing", "hi", AGENT))
        .await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(
        error_message(&events[0]),
        "Conversation not found: TRK-MISSING"
    );
    assert!(
        store
            .find_by_tracking_id(&TrackingId::new("trk-missing"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_concurrent_first_messages_create_one_conversation() {
    let (hub, store) = test_hub().await;
    let (a, _rx_a) = hub.register(None);
    let (b, _rx_b) = hub.register(None);

    tokio::join!(
        hub.handle_event(a, customer("trk-race", "from a", "Jane")),
        hub.handle_event(b, customer("TRK-RACE", "from b", "Jane")),
    );

    let all = store.list_all(ConversationFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].messages.len(), 2);
}

#[tokio::test]
async fn test_concurrent_find_or_create_is_idempotent() {
    let (_hub, store) = test_hub().await;
    let id = TrackingId::new("trk-dup");

    let (first, second) = tokio::join!(
        store.find_or_create(&id, "Jane", None),
        store.find_or_create(&id, "Other", Some("other@example.com")),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(first.customer_name, second.customer_name);
    assert_eq!(
        store.list_all(ConversationFilter::default()).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_unread_flag_follows_last_sender() {
    let (hub, store) = test_hub().await;
    let (customer_session, _c) = hub.register(None);
    let (staff_session, _s) = hub.register(Some(claims_for(AGENT)));
    let id = TrackingId::new("trk-unread");

    hub.handle_event(customer_session, customer("trk-unread", "help", "Jane"))
        .await;
    assert!(
        store
            .find_by_tracking_id(&id)
            .await
            .unwrap()
            .unwrap()
            .is_unread_by_admin
    );

    hub.handle_event(staff_session, staff_reply("trk-unread", "on it", AGENT))
        .await;
    let after_staff = store.find_by_tracking_id(&id).await.unwrap().unwrap();
    assert!(!after_staff.is_unread_by_admin);
    let reply = after_staff.last_message().unwrap();
    assert_eq!(reply.sender, Sender::Admin);
    assert_eq!(reply.admin_id.as_deref(), Some(AGENT));
    assert_eq!(reply.admin_name.as_deref(), Some("Support Agent"));

    hub.handle_event(customer_session, customer("trk-unread", "thanks", "Jane"))
        .await;
    assert!(
        store
            .find_by_tracking_id(&id)
            .await
            .unwrap()
            .unwrap()
            .is_unread_by_admin
    );
}

#[tokio::test]
async fn test_typing_indicator_is_not_echoed() {
    let (hub, _store) = test_hub().await;
    let (a, mut rx_a) = hub.register(None);
    let (b, mut rx_b) = hub.register(None);
    let (outsider, mut rx_outsider) = hub.register(None);

    hub.handle_event(a, join("trk-typing")).await;
    hub.handle_event(b, join("trk-typing")).await;
    hub.handle_event(outsider, join("trk-elsewhere")).await;

    let payload: TypingIndicator = serde_json::from_value(json!({
        "trackingId": "trk-typing",
        "typing": true,
        "name": "Jane",
        "isTyping": true
    }))
    .unwrap();
    hub.handle_event(a, ClientEvent::TypingIndicator(payload.clone()))
        .await;

    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_outsider).is_empty());
    assert_eq!(
        drain(&mut rx_b),
        vec![ServerEvent::TypingIndicator(payload)]
    );
}

#[tokio::test]
async fn test_admin_dashboard_sees_customer_message() {
    let (hub, _store) = test_hub().await;
    let (a, mut rx_a) = hub.register(None);
    let (b, mut rx_b) = hub.register(Some(claims_for(AGENT)));

    hub.handle_event(a, join("trk-abc123xyz0")).await;
    hub.handle_event(b, ClientEvent::AdminSubscribe).await;
    assert!(drain(&mut rx_a).is_empty(), "no history for a new id");
    assert!(hub.rooms().is_member(ADMIN_ROOM, &b));

    hub.handle_event(
        a,
        customer("trk-abc123xyz0", "Where is my order?", "Jane"),
    )
    .await;

    let admin_events = drain(&mut rx_b);
    assert_eq!(admin_events.len(), 1);
    let ServerEvent::ConversationUpdated { conversation } = &admin_events[0] else {
        panic!("expected conversation-updated, got {}", admin_events[0].name());
    };
    assert_eq!(conversation.tracking_id.as_str(), "TRK-ABC123XYZ0");
    assert_eq!(conversation.messages.len(), 1);
    assert!(conversation.is_unread_by_admin);

    // The sender gets the authoritative copy back through the room.
    let customer_events = drain(&mut rx_a);
    assert_eq!(customer_events.len(), 1);
    let ServerEvent::NewMessage(new_message) = &customer_events[0] else {
        panic!("expected new-message, got {}", customer_events[0].name());
    };
    assert_eq!(new_message.message.message, "Where is my order?");
    assert_eq!(new_message.conversation.customer_name, "Jane");
}

#[tokio::test]
async fn test_staff_message_also_reaches_admin_room() {
    let (hub, _store) = test_hub().await;
    let (customer_session, mut rx_customer) = hub.register(None);
    let (agent, mut rx_agent) = hub.register(Some(claims_for(AGENT)));

    hub.handle_event(customer_session, customer("trk-both", "hi", "Jane"))
        .await;
    hub.handle_event(customer_session, join("trk-both")).await;
    hub.handle_event(agent, ClientEvent::AdminSubscribe).await;
    hub.handle_event(agent, join("trk-both")).await;
    drain(&mut rx_customer);
    drain(&mut rx_agent);

    hub.handle_event(agent, staff_reply("trk-both", "hello Jane", AGENT))
        .await;

    let names: Vec<&str> = drain(&mut rx_agent).iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["new-message", "conversation-updated"]);

    let customer_events = drain(&mut rx_customer);
    assert_eq!(customer_events.len(), 1);
    assert_eq!(customer_events[0].name(), "new-message");
}

#[tokio::test]
async fn test_join_sends_existing_history_once() {
    let (hub, store) = test_hub().await;
    let id = TrackingId::new("trk-history");
    store.find_or_create(&id, "Jane", None).await.unwrap();
    for body in ["one", "two", "three"] {
        store
            .append_message(&id, &Message::from_customer(body, now_millis()), true)
            .await
            .unwrap();
    }

    let (a, mut rx) = hub.register(None);
    hub.handle_event(a, join("trk-history")).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    let ServerEvent::ChatHistory(conversation) = &events[0] else {
        panic!("expected chat-history, got {}", events[0].name());
    };
    let bodies: Vec<&str> = conversation
        .messages
        .iter()
        .map(|m| m.message.as_str())
        .collect();
    assert_eq!(bodies, vec!["one", "two", "three"]);

    let stored = store.find_by_tracking_id(&id).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 3);
}

#[tokio::test]
async fn test_disconnect_clears_presence_and_rooms() {
    let (hub, _store) = test_hub().await;
    let (a, _rx_a) = hub.register(None);
    let (b, _rx_b) = hub.register(None);
    let id = TrackingId::new("trk-abc123xyz0");

    hub.handle_event(a, join("trk-other")).await;
    hub.handle_event(b, join("trk-abc123xyz0")).await;
    hub.handle_event(b, join("trk-second")).await;
    assert_eq!(hub.presence().lookup(&id), Some(b));
    assert_eq!(hub.connection_count(), 2);

    hub.disconnect(&b);

    assert!(!hub.presence().references(&b));
    assert_eq!(hub.presence().lookup(&id), None);
    assert!(!hub.rooms().is_member(&conversation_room(&id), &b));
    assert_eq!(hub.presence().lookup(&TrackingId::new("trk-other")), Some(a));
    assert_eq!(hub.connection_count(), 1);
}

#[tokio::test]
async fn test_invalid_customer_message_is_rejected() {
    let (hub, store) = test_hub().await;
    let (session, mut rx) = hub.register(None);

    for event in [
        customer("", "hi", "Jane"),
        customer("trk-invalid", "   ", "Jane"),
        customer("trk-invalid", "hi", ""),
    ] {
        hub.handle_event(session, event).await;
    }

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    for event in &events {
        assert!(error_message(event).starts_with("Invalid message data"));
    }
    assert!(
        store
            .list_all(ConversationFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_errors_go_to_sender_only() {
    let (hub, _store) = test_hub().await;
    let (a, mut rx_a) = hub.register(None);
    let (b, mut rx_b) = hub.register(None);
    hub.handle_event(a, join("trk-quiet")).await;
    hub.handle_event(b, join("trk-quiet")).await;

    hub.handle_event(a, customer("trk-quiet", "", "Jane")).await;

    assert_eq!(drain(&mut rx_a).len(), 1);
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn test_store_failure_is_reported_without_broadcast() {
    let store = Arc::new(FailingStore::new().await);
    let hub = Hub::new(store.clone(), &RealtimeConfig::default());
    let id = TrackingId::new("trk-down01");

    let (customer_session, mut customer_rx) = hub.register(None);
    let (watcher, mut watcher_rx) = hub.register(None);
    let (dashboard, mut dashboard_rx) = hub.register(Some(claims_for(AGENT)));
    hub.handle_event(dashboard, ClientEvent::AdminSubscribe).await;
    hub.handle_event(watcher, join("trk-down01")).await;

    store.set_failing(true);

    hub.handle_event(customer_session, join("trk-down01")).await;
    assert_eq!(
        drain(&mut customer_rx),
        vec![ServerEvent::error("Failed to join conversation")]
    );

    hub.handle_event(
        customer_session,
        customer("trk-down01", "Where is my order?", "Jane"),
    )
    .await;
    assert_eq!(
        drain(&mut customer_rx),
        vec![ServerEvent::error("Failed to send message")]
    );
    assert!(drain(&mut watcher_rx).is_empty());
    assert!(drain(&mut dashboard_rx).is_empty());

    // The same connection recovers once the store does.
    store.set_failing(false);
    assert!(store.find_by_tracking_id(&id).await.unwrap().is_none());

    hub.handle_event(
        customer_session,
        customer("trk-down01", "Where is my order?", "Jane"),
    )
    .await;

    let own = drain(&mut customer_rx);
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].name(), "new-message");
    assert_eq!(drain(&mut watcher_rx).len(), 1);
    let dashboard_events = drain(&mut dashboard_rx);
    assert_eq!(dashboard_events.len(), 1);
    assert_eq!(dashboard_events[0].name(), "conversation-updated");
}

#[tokio::test]
async fn test_typing_without_tracking_id_is_dropped() {
    let (hub, _store) = test_hub().await;
    let (typist, mut typist_rx) = hub.register(None);
    let (other, mut other_rx) = hub.register(None);
    hub.handle_event(other, join("trk-quiet")).await;
    hub.handle_event(typist, join("trk-quiet")).await;
    drain(&mut other_rx);
    drain(&mut typist_rx);

    let payload: TypingIndicator =
        serde_json::from_value(json!({ "typing": true, "name": "Jane" })).unwrap();
    hub.handle_event(typist, ClientEvent::TypingIndicator(payload))
        .await;

    assert!(drain(&mut typist_rx).is_empty());
    assert!(drain(&mut other_rx).is_empty());
}

#[tokio::test]
async fn test_staff_events_require_verified_credential() {
    let (hub, store) = test_hub().await;
    let (customer_session, _c) = hub.register(None);
    hub.handle_event(customer_session, customer("trk-auth", "hi", "Jane"))
        .await;

    let expired = Claims {
        exp: Utc::now().timestamp() - 60,
        ..claims_for(AGENT)
    };
    let cases = [
        (None, "staff credential required"),
        (Some(claims_for(VIEWER)), "chat access required"),
        (Some(expired), "staff credential expired"),
    ];

    for (claims, expected) in cases {
        let staff_id = claims.as_ref().map_or(AGENT, |c| c.sub.as_str()).to_string();
        let (session, mut rx) = hub.register(claims);

        hub.handle_event(session, staff_reply("trk-auth", "spoofed", &staff_id))
            .await;
        hub.handle_event(session, ClientEvent::AdminSubscribe).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2, "{expected}");
        for event in &events {
            let message = error_message(event);
            assert!(message.starts_with("Unauthorized"), "{message}");
            assert!(message.contains(expected), "{message}");
        }
        assert!(!hub.rooms().is_member(ADMIN_ROOM, &session));
    }

    // A valid credential cannot speak for another staff member.
    let (agent, mut rx) = hub.register(Some(claims_for(AGENT)));
    hub.handle_event(agent, staff_reply("trk-auth", "spoofed", "someone-else"))
        .await;
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(
        error_message(&events[0]),
        "Unauthorized: staffId does not match credential"
    );

    let conversation = store
        .find_by_tracking_id(&TrackingId::new("trk-auth"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert!(conversation.is_unread_by_admin);
}

#[tokio::test]
async fn test_trusted_identity_mode_accepts_asserted_staff() {
    let (hub, store) = test_hub_with(RealtimeConfig {
        trust_asserted_identity: true,
        ..RealtimeConfig::default()
    })
    .await;
    let (customer_session, _c) = hub.register(None);
    let (legacy_staff, mut rx) = hub.register(None);

    hub.handle_event(customer_session, customer("trk-legacy", "hi", "Jane"))
        .await;
    hub.handle_event(legacy_staff, ClientEvent::AdminSubscribe).await;
    hub.handle_event(legacy_staff, staff_reply("trk-legacy", "hello", "staff-7"))
        .await;

    assert!(hub.rooms().is_member(ADMIN_ROOM, &legacy_staff));
    let names: Vec<&str> = drain(&mut rx).iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["conversation-updated"]);

    let conversation = store
        .find_by_tracking_id(&TrackingId::new("trk-legacy"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(
        conversation.last_message().unwrap().admin_id.as_deref(),
        Some("staff-7")
    );
}

#[tokio::test]
async fn test_dispatch_is_usable_without_delivery() {
    let (hub, _store) = test_hub().await;
    let (session, mut rx) = hub.register(None);

    let deliveries = hub
        .dispatch(session, customer("trk-pure", "hi", "Jane"))
        .await
        .unwrap();

    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].event.name(), "new-message");
    assert_eq!(deliveries[1].event.name(), "conversation-updated");
    assert!(drain(&mut rx).is_empty(), "dispatch itself sends nothing");
}

#[tokio::test]
async fn test_staff_updates_are_ordered_with_messages() {
    let (hub, _store) = test_hub().await;
    let id = TrackingId::new("trk-order01");
    let (customer_session, _customer_rx) = hub.register(None);
    hub.handle_event(customer_session, customer("trk-order01", "help", "Jane"))
        .await;

    let (dashboard, mut dashboard_rx) = hub.register(Some(claims_for(AGENT)));
    hub.handle_event(dashboard, ClientEvent::AdminSubscribe).await;

    let (updated, ()) = tokio::join!(
        hub.update_status(&id, ConversationStatus::Resolved),
        hub.handle_event(customer_session, customer("trk-order01", "still there?", "Jane"))
    );
    assert_eq!(updated.unwrap().status, ConversationStatus::Resolved);

    let events = drain(&mut dashboard_rx);
    assert_eq!(events.len(), 2);
    let ServerEvent::ConversationUpdated { conversation } = &events[1] else {
        panic!("expected conversation-updated, got {}", events[1].name());
    };
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.status, ConversationStatus::Resolved);
}

#[tokio::test]
async fn test_mark_read_of_missing_conversation_publishes_nothing() {
    let (hub, _store) = test_hub().await;
    let (dashboard, mut dashboard_rx) = hub.register(Some(claims_for(AGENT)));
    hub.handle_event(dashboard, ClientEvent::AdminSubscribe).await;

    let result = hub.mark_read(&TrackingId::new("trk-ghost")).await;

    assert!(matches!(result, Err(StoreError::NotFound(_))));
    assert!(drain(&mut dashboard_rx).is_empty());
}

#[tokio::test]
async fn test_message_bodies_are_stored_trimmed() {
    let (hub, store) = test_hub().await;
    let (session, _rx) = hub.register(None);

    hub.handle_event(session, customer("trk-trim01", "  Where is my order?  ", "Jane"))
        .await;

    let conversation = store
        .find_by_tracking_id(&TrackingId::new("trk-trim01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.messages[0].message, "Where is my order?");
}
