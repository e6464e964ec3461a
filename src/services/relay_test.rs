use super::*;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

use crate::services::store::test_helpers::MemoryStore;
use crate::state::test_helpers::{is_presence, open_connection, test_app_state, test_config};

/// Next relay event, skipping presence announcements.
async fn recv_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    loop {
        let event = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed");
        if !is_presence(&event) {
            return event;
        }
    }
}

async fn assert_no_event(rx: &mut mpsc::Receiver<ServerEvent>) {
    while let Ok(event) = timeout(Duration::from_millis(80), rx.recv()).await {
        let event = event.expect("channel closed");
        assert!(is_presence(&event), "expected no relay event, got {event:?}");
    }
}

fn text_message(text: &str, correlation_id: Option<&str>) -> SendMessage {
    SendMessage {
        text: Some(text.into()),
        correlation_id: correlation_id.map(Into::into),
        ..SendMessage::default()
    }
}

fn error_event(err: &RelayError) -> crate::event::ErrorEvent {
    match ServerEvent::error_from(err) {
        ServerEvent::Error(e) => e,
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn message_is_acked_persisted_and_forwarded() {
    let (state, store, alice, bob) = test_app_state();
    let (a1, mut rx_a1) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);

    let ack = send_message(&state, &a1, &alice, text_message("hi", Some("c1"))).await.unwrap();

    let ServerEvent::MessageSent(sent) = ack else {
        panic!("expected message_sent, got {ack:?}");
    };
    assert_eq!(sent.correlation_id.as_deref(), Some("c1"));
    assert_eq!(sent.message.text, "hi");
    assert_eq!(sent.message.sender, alice.id);
    assert_eq!(sent.message.recipient, bob.id);

    let ServerEvent::ReceiveMessage(received) = recv_event(&mut rx_b1).await else {
        panic!("expected receive_message");
    };
    assert_eq!(received, sent);
    assert_no_event(&mut rx_a1).await;

    assert_eq!(store.messages(), vec![sent.message]);
}

#[tokio::test]
async fn one_sender_keeps_message_order() {
    let (state, _store, alice, bob) = test_app_state();
    let (a1, _rx_a1) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);

    let mut acked = Vec::new();
    for (text, correlation_id) in [("m1", "c1"), ("m2", "c2"), ("m3", "c3")] {
        let ack = send_message(&state, &a1, &alice, text_message(text, Some(correlation_id))).await.unwrap();
        let ServerEvent::MessageSent(sent) = ack else {
            panic!("expected message_sent, got {ack:?}");
        };
        acked.push((sent.message.text, sent.correlation_id));
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        let ServerEvent::ReceiveMessage(delivery) = recv_event(&mut rx_b1).await else {
            panic!("expected receive_message");
        };
        received.push((delivery.message.text, delivery.correlation_id));
    }

    let expected: Vec<_> = [("m1", "c1"), ("m2", "c2"), ("m3", "c3")]
        .into_iter()
        .map(|(text, id)| (text.to_owned(), Some(id.to_owned())))
        .collect();
    assert_eq!(acked, expected);
    assert_eq!(received, expected);
}

#[tokio::test]
async fn peer_stored_with_mixed_case_handle_resolves() {
    let store = Arc::new(MemoryStore::new());
    let alice = store.add_participant("alice");
    let bob = store.add_participant("Bob");
    let state = crate::state::AppState::new(store.clone(), &test_config());
    let (a1, _rx_a1) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);

    let ServerEvent::MessageSent(sent) = send_message(&state, &a1, &alice, text_message("hey", None)).await.unwrap() else {
        panic!("expected message_sent");
    };
    assert_eq!(sent.message.recipient, bob.id);
    assert!(matches!(recv_event(&mut rx_b1).await, ServerEvent::ReceiveMessage(_)));
}

#[tokio::test]
async fn message_reaches_every_peer_tab_and_sender_siblings() {
    let (state, _store, alice, bob) = test_app_state();
    let (a1, mut rx_a1) = open_connection(&state, &alice);
    let (_a2, mut rx_a2) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);
    let (_b2, mut rx_b2) = open_connection(&state, &bob);

    send_message(&state, &a1, &alice, text_message("hello", None)).await.unwrap();

    for rx in [&mut rx_a2, &mut rx_b1, &mut rx_b2] {
        assert!(matches!(recv_event(rx).await, ServerEvent::ReceiveMessage(_)));
    }
    assert_no_event(&mut rx_a1).await;
}

#[tokio::test]
async fn offline_peer_still_gets_message_persisted() {
    let (state, store, alice, _bob) = test_app_state();
    let (a1, _rx_a1) = open_connection(&state, &alice);

    let ack = send_message(&state, &a1, &alice, text_message("later", None)).await.unwrap();
    assert!(matches!(ack, ServerEvent::MessageSent(_)));
    assert_eq!(store.messages().len(), 1);
}

#[tokio::test]
async fn client_timestamp_and_reaction_are_kept() {
    let (state, _store, alice, _bob) = test_app_state();
    let (a1, _rx) = open_connection(&state, &alice);
    let at = "2024-05-01T10:00:00Z".parse().unwrap();
    let request = SendMessage {
        text: Some("look".into()),
        reaction_tag: Some("heart".into()),
        timestamp: Some(at),
        correlation_id: None,
    };

    let ServerEvent::MessageSent(sent) = send_message(&state, &a1, &alice, request).await.unwrap() else {
        panic!("expected message_sent");
    };
    assert_eq!(sent.message.timestamp, at);
    assert_eq!(sent.message.reaction_tag.as_deref(), Some("heart"));
}

#[tokio::test]
async fn empty_text_is_rejected_without_side_effects() {
    let (state, store, alice, bob) = test_app_state();
    let (a1, _rx_a1) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);

    for request in [SendMessage::default(), text_message("", None), text_message("   ", None)] {
        let err = send_message(&state, &a1, &alice, request).await.unwrap_err();
        assert!(matches!(err, RelayError::EmptyText));
        let event = error_event(&err);
        assert_eq!(event.code.as_deref(), Some("E_EMPTY_TEXT"));
        assert_eq!(event.details, None);
    }

    assert!(store.messages().is_empty());
    assert_no_event(&mut rx_b1).await;
}

#[tokio::test]
async fn unprovisioned_peer_is_recipient_not_found() {
    let store = Arc::new(MemoryStore::new());
    let alice = store.add_participant("alice");
    let state = crate::state::AppState::new(store.clone(), &test_config());
    let (a1, _rx) = open_connection(&state, &alice);

    let err = send_message(&state, &a1, &alice, text_message("anyone?", None)).await.unwrap_err();
    assert!(matches!(err, RelayError::RecipientNotFound));

    let event = error_event(&err);
    assert_eq!(event.message, "Error sending message");
    assert_eq!(event.code.as_deref(), Some("E_RECIPIENT_NOT_FOUND"));
    assert_eq!(event.details.as_deref(), Some("Recipient not found"));
    assert!(store.messages().is_empty());
}

#[tokio::test]
async fn persistence_failure_is_reported_and_nothing_forwarded() {
    let (state, store, alice, bob) = test_app_state();
    let (a1, _rx_a1) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);

    store.set_fail_writes(true);
    let err = send_message(&state, &a1, &alice, text_message("lost", None)).await.unwrap_err();
    assert!(matches!(err, RelayError::Persistence(_)));
    let event = error_event(&err);
    assert_eq!(event.message, "Error sending message");
    assert_eq!(event.code.as_deref(), Some("E_PERSISTENCE"));
    assert_eq!(event.details.as_deref(), Some("message could not be saved"));
    assert_no_event(&mut rx_b1).await;

    store.set_fail_writes(false);
    send_message(&state, &a1, &alice, text_message("retry", None)).await.unwrap();
    assert!(matches!(recv_event(&mut rx_b1).await, ServerEvent::ReceiveMessage(_)));
}

#[tokio::test]
async fn typing_reaches_peer_only() {
    let (state, _store, alice, bob) = test_app_state();
    let (_a1, mut rx_a1) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);

    typing(&state, &alice, true).await;

    assert_eq!(
        recv_event(&mut rx_b1).await,
        ServerEvent::Typing(TypingEvent { is_typing: true, participant: "alice".into() })
    );
    assert_no_event(&mut rx_a1).await;
}

#[tokio::test]
async fn typing_with_unresolved_peer_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let alice = store.add_participant("alice");
    let state = crate::state::AppState::new(store, &test_config());
    let (_a1, mut rx_a1) = open_connection(&state, &alice);

    typing(&state, &alice, false).await;
    assert_no_event(&mut rx_a1).await;
}
