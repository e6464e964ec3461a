//! WebSocket handler — authenticated presence and chat relay.
//!
//! DESIGN
//! ======
//! Authentication happens before the upgrade; a refused connection never
//! reaches the registry. After the upgrade one task per connection runs a
//! `select!` loop over:
//! - inbound client events → parse into `ClientEvent` + dispatch
//! - events queued for this connection by other tasks → forward to client
//! - the keepalive ticker → ping, or close when the peer went silent
//!
//! Replies to the originating connection are written directly on the
//! socket; everything produced by other connections arrives via the queue.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connection_success`
//! 2. Look up the peer → register (snapshot of the peer's status, then
//!    `user_online` to everyone)
//! 3. Client events → dispatch → replies to sender, forwards to others
//! 4. Close / keepalive timeout → deregister → `user_offline` if last

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::auth::bearer_token;
use crate::event::{ClientEvent, ConnectionSuccess, ServerEvent};
use crate::services::presence::Connection;
use crate::services::store::Participant;
use crate::services::{auth, relay};
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credential = params
        .get("token")
        .map(String::as_str)
        .or_else(|| bearer_token(&headers));

    let participant = match auth::authenticate(&state.store, &state.tokens, state.presence.pair(), credential).await {
        Ok(participant) => participant,
        Err(e) if e.is_rejection() => {
            return (StatusCode::UNAUTHORIZED, e.reason()).into_response();
        }
        Err(e) => {
            error!(error = %e, "ws: authentication could not complete");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.reason()).into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, participant))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, participant: Participant) {
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.settings.outbound_buffer);
    let connection = Connection::new(participant.id, tx);
    let connection_id = connection.id;

    let welcome = ServerEvent::ConnectionSuccess(ConnectionSuccess {
        message: "Connected successfully".into(),
        participant_id: participant.id,
        handle: participant.handle.clone(),
    });
    if send_event(&mut socket, &welcome).await.is_err() {
        return;
    }

    let peer = lookup_peer(&state, &participant).await;
    let registration = state.broadcaster.track(connection.clone(), &participant, peer.as_ref());
    info!(
        %connection_id,
        participant = %participant.handle,
        connections = registration.connections,
        came_online = registration.came_online,
        announced = registration.announced,
        "ws: client connected"
    );

    let keepalive = state.settings.keepalive;
    let mut ping = tokio::time::interval_at(Instant::now() + keepalive.ping_interval, keepalive.ping_interval);
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                last_heard = Instant::now();
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &connection, &participant, text.as_str()).await;
                        if send_replies(&mut socket, &replies).await.is_err() {
                            break;
                        }
                    }
                    Message::Binary(_) => {
                        let reply = ServerEvent::error("binary frames are not supported");
                        if send_event(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if last_heard.elapsed() > keepalive.ping_timeout {
                    warn!(%connection_id, "ws: keepalive timeout");
                    break;
                }
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let went_offline = state.broadcaster.release(&participant, connection_id).is_some();
    let lifetime_secs = (Utc::now() - connection.opened_at).num_seconds();
    info!(
        %connection_id,
        participant = %participant.handle,
        went_offline,
        lifetime_secs,
        open_connections = state.presence.connection_count(),
        "ws: client disconnected"
    );
}

/// Resolve the peer for the status snapshot a fresh connection receives.
/// `None` when the peer is not provisioned yet or the lookup failed.
async fn lookup_peer(state: &AppState, participant: &Participant) -> Option<Participant> {
    let peer_handle = state.presence.other_of(&participant.handle).ok()?;
    match state.store.find_participant_by_handle(peer_handle).await {
        Ok(peer) => {
            if peer.is_none() {
                debug!(peer = %peer_handle, "ws: peer not provisioned, no status snapshot");
            }
            peer
        }
        Err(e) => {
            warn!(peer = %peer_handle, error = %e, "ws: peer status lookup failed");
            None
        }
    }
}

// =============================================================================
// EVENT DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return events for the sender.
///
/// This keeps websocket transport concerns separate from event handling,
/// so tests can exercise dispatch without a socket.
async fn process_inbound_text(
    state: &AppState,
    connection: &Connection,
    participant: &Participant,
    text: &str,
) -> Vec<ServerEvent> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(connection_id = %connection.id, error = %e, "ws: invalid inbound event");
            return vec![ServerEvent::error_with_details("invalid event", e.to_string())];
        }
    };

    match event {
        ClientEvent::SendMessage(request) => {
            match relay::send_message(state, connection, participant, request).await {
                Ok(ack) => vec![ack],
                Err(e) => vec![ServerEvent::error_from(&e)],
            }
        }
        ClientEvent::Typing(typing) => {
            relay::typing(state, participant, typing.is_typing).await;
            vec![]
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Write replies in order, stopping at the first failed write.
async fn send_replies<S>(sink: &mut S, replies: &[ServerEvent]) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    for reply in replies {
        send_event(sink, reply).await?;
    }
    Ok(())
}

async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    match event {
        ServerEvent::Error(err) => {
            warn!(event = event.name(), code = err.code.as_deref().unwrap_or("-"), message = %err.message, "ws: send error");
        }
        ServerEvent::Typing(_) => {}
        _ => debug!(event = event.name(), "ws: send event"),
    }
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
