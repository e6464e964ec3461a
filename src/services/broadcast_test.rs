use super::*;
use crate::event::{PresenceEvent, ServerEvent};
use crate::state::test_helpers::{open_connection, test_app_state};
use tokio::sync::mpsc;
use tokio::time::timeout_at;

/// Collect every event that arrives within `window`.
async fn drain_for(rx: &mut mpsc::Receiver<ServerEvent>, window: Duration) -> Vec<ServerEvent> {
    let deadline = Instant::now() + window;
    let mut events = Vec::new();
    while let Ok(Some(event)) = timeout_at(deadline, rx.recv()).await {
        events.push(event);
    }
    events
}

fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn presence(event: &ServerEvent) -> &PresenceEvent {
    match event {
        ServerEvent::UserOnline(p) | ServerEvent::UserOffline(p) => p,
        other => panic!("expected presence event, got {other:?}"),
    }
}

#[tokio::test]
async fn track_announces_online_to_every_connection() {
    let (state, _store, alice, bob) = test_app_state();
    let (_a1, mut rx_a1) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);

    let seen_by_alice: Vec<_> = drain(&mut rx_a1).iter().map(|e| presence(e).participant.clone()).collect();
    assert_eq!(seen_by_alice, ["alice", "bob"]);

    let seen_by_bob = drain(&mut rx_b1);
    assert_eq!(seen_by_bob.len(), 1);
    assert!(matches!(seen_by_bob[0], ServerEvent::UserOnline(_)));
    let p = presence(&seen_by_bob[0]);
    assert_eq!(p.participant, "bob");
    assert_eq!(p.last_seen, None);
}

#[tokio::test]
async fn track_sends_peer_status_before_own_announcement() {
    let (state, _store, alice, bob) = test_app_state();
    let (tx, mut rx) = mpsc::channel(8);
    let connection = Connection::new(alice.id, tx);

    let registration = state.broadcaster.track(connection, &alice, Some(&bob));
    assert!(registration.came_online);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ServerEvent::UserOffline(_)));
    assert_eq!(presence(&events[0]).participant, "bob");
    assert!(matches!(events[1], ServerEvent::UserOnline(_)));
    assert_eq!(presence(&events[1]).participant, "alice");
}

#[tokio::test]
async fn release_announces_offline_once() {
    let (state, _store, alice, bob) = test_app_state();
    let (a1, _rx_a1) = open_connection(&state, &alice);
    let (a2, _rx_a2) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);
    drain(&mut rx_b1);

    assert_eq!(state.broadcaster.release(&alice, a1.id), None);
    assert!(drain(&mut rx_b1).is_empty());

    let last_seen = state.broadcaster.release(&alice, a2.id).expect("last connection");
    assert_eq!(state.broadcaster.release(&alice, a2.id), None);

    let events = drain(&mut rx_b1);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ServerEvent::UserOffline(_)));
    let p = presence(&events[0]);
    assert_eq!(p.participant, "alice");
    assert!(!p.is_online);
    assert_eq!(p.last_seen, Some(last_seen));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn offline_never_follows_a_newer_online() {
    let (state, _store, alice, bob) = test_app_state();
    let (_b1, mut rx_b1) = open_connection(&state, &bob);
    let (first, rx_first) = open_connection(&state, &alice);
    let mut current = first;
    let mut receivers = vec![rx_first];

    for _ in 0..500 {
        drain(&mut rx_b1);
        let (tx, rx_next) = mpsc::channel(32);
        let next = Connection::new(alice.id, tx);
        receivers.push(rx_next);

        let releasing = {
            let broadcaster = state.broadcaster.clone();
            let alice = alice.clone();
            let id = current.id;
            tokio::spawn(async move { broadcaster.release(&alice, id) })
        };
        let tracking = {
            let broadcaster = state.broadcaster.clone();
            let alice = alice.clone();
            let next = next.clone();
            tokio::spawn(async move { broadcaster.track(next, &alice, None) })
        };
        releasing.await.unwrap();
        tracking.await.unwrap();

        assert!(state.presence.is_online(alice.id));
        let last_about_alice = drain(&mut rx_b1)
            .into_iter()
            .rev()
            .find(|e| presence(e).participant == "alice")
            .expect("alice was announced");
        assert!(
            matches!(last_about_alice, ServerEvent::UserOnline(_)),
            "observer left with {last_about_alice:?} while alice is online"
        );
        current = next;
    }
}

#[tokio::test(start_paused = true)]
async fn refresh_reannounces_online_each_period() {
    let (state, _store, alice, bob) = test_app_state();
    let (_a1, _rx_a1) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);
    drain(&mut rx_b1);

    assert!(drain_for(&mut rx_b1, Duration::from_secs(29)).await.is_empty());

    let events = drain_for(&mut rx_b1, Duration::from_secs(32)).await;
    let alice_refreshes = events
        .iter()
        .filter(|e| matches!(e, ServerEvent::UserOnline(p) if p.participant == "alice"))
        .count();
    assert_eq!(alice_refreshes, 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_stops_after_last_connection_closes() {
    let (state, _store, alice, bob) = test_app_state();
    let (a1, _rx_a1) = open_connection(&state, &alice);
    let (_b1, mut rx_b1) = open_connection(&state, &bob);
    drain(&mut rx_b1);

    assert!(state.presence.has_refresh_timer(alice.id));
    state.broadcaster.release(&alice, a1.id);
    assert!(!state.presence.has_refresh_timer(alice.id));

    let events = drain_for(&mut rx_b1, Duration::from_secs(120)).await;
    let about_alice: Vec<_> = events
        .iter()
        .map(presence)
        .filter(|p| p.participant == "alice")
        .collect();
    assert_eq!(about_alice.len(), 1);
    assert!(!about_alice[0].is_online);
}
