//! Relay engine — chat messages and typing signals between the pair.
//!
//! DESIGN
//! ======
//! A chat send is validated, the peer resolved by handle, the message
//! persisted once, and then delivered in this order:
//! 1. `receive_message` to every open connection of the peer
//! 2. `receive_message` to the sender's other connections (other tabs)
//! 3. `message_sent` returned for the originating connection
//!
//! The connection task handles its inbound events one at a time, so events
//! produced by one connection keep their relative order on every receiver.
//!
//! ERROR HANDLING
//! ==============
//! Chat failures come back as `RelayError` and are rendered to the sender
//! only. Typing is best-effort: failures are logged and dropped.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::presence::{Connection, PresenceError};
use super::store::{NewMessage, Participant, StoreError};
use crate::event::{ErrorCode, MessageDelivery, SendMessage, ServerEvent, TypingEvent};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("message text is required")]
    EmptyText,
    #[error("Recipient not found")]
    RecipientNotFound,
    #[error(transparent)]
    Presence(#[from] PresenceError),
    #[error("failed to store message: {0}")]
    Persistence(#[from] StoreError),
}

impl ErrorCode for RelayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyText => "E_EMPTY_TEXT",
            Self::RecipientNotFound | Self::Presence(_) => "E_RECIPIENT_NOT_FOUND",
            Self::Persistence(_) => "E_PERSISTENCE",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::EmptyText => self.to_string(),
            _ => "Error sending message".to_owned(),
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::EmptyText => None,
            // Store internals stay in the server log.
            Self::Persistence(_) => Some("message could not be saved".to_owned()),
            _ => Some(self.to_string()),
        }
    }
}

/// Resolve the other participant of the pair through the store.
async fn resolve_peer(state: &AppState, sender: &Participant) -> Result<Participant, RelayError> {
    let peer_handle = state.presence.other_of(&sender.handle)?;
    state
        .store
        .find_participant_by_handle(peer_handle)
        .await?
        .ok_or(RelayError::RecipientNotFound)
}

/// Persist and relay one chat message from `origin`. Returns the
/// acknowledgment event for the originating connection.
///
/// # Errors
///
/// Returns `EmptyText` for missing or blank text, `RecipientNotFound` when
/// the peer is not provisioned, and `Persistence` when the store write fails.
/// Nothing is persisted or forwarded on error.
pub async fn send_message(
    state: &AppState,
    origin: &Connection,
    sender: &Participant,
    request: SendMessage,
) -> Result<ServerEvent, RelayError> {
    let text = match request.text {
        Some(text) if !text.trim().is_empty() => text,
        _ => {
            warn!(connection_id = %origin.id, sender = %sender.handle, "relay: rejected message without text");
            return Err(RelayError::EmptyText);
        }
    };

    let peer = resolve_peer(state, sender).await.inspect_err(|e| {
        warn!(sender = %sender.handle, error = %e, "relay: peer resolution failed");
    })?;

    let stored = state
        .store
        .create_message(NewMessage {
            text,
            reaction_tag: request.reaction_tag,
            sender: sender.id,
            recipient: peer.id,
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
        })
        .await
        .inspect_err(|e| error!(sender = %sender.handle, error = %e, "relay: message persistence failed"))?;

    let delivery = MessageDelivery { message: stored, correlation_id: request.correlation_id };

    let forward = ServerEvent::ReceiveMessage(delivery.clone());
    let to_peer = state.presence.send_to(peer.id, &forward, Some(origin.id));
    let to_siblings = state.presence.send_to(sender.id, &forward, Some(origin.id));

    info!(
        message_id = %delivery.message.id,
        sender = %sender.handle,
        recipient = %peer.handle,
        peer_online = state.presence.is_online(peer.id),
        to_peer,
        to_siblings,
        "relay: message delivered"
    );

    Ok(ServerEvent::MessageSent(delivery))
}

/// Forward a typing indicator to the peer's open connections. Best-effort.
pub async fn typing(state: &AppState, sender: &Participant, is_typing: bool) {
    let peer = match resolve_peer(state, sender).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!(sender = %sender.handle, error = %e, "relay: typing dropped, peer unresolved");
            return;
        }
    };

    let event = ServerEvent::Typing(TypingEvent { is_typing, participant: sender.handle.clone() });
    let delivered = state.presence.send_to(peer.id, &event, None);
    debug!(sender = %sender.handle, is_typing, delivered, "relay: typing forwarded");
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
