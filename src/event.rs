//! Event — the wire vocabulary between relay and clients.
//!
//! ARCHITECTURE
//! ============
//! Every WebSocket text frame carries exactly one event encoded as
//! `{"event": <name>, "data": {...}}`. Inbound and outbound vocabularies are
//! separate tagged unions so the connection task matches on an explicit
//! type instead of dispatching on strings.
//!
//! DESIGN
//! ======
//! - Payload fields are camelCase on the wire.
//! - Timestamps are RFC 3339 UTC strings.
//! - Errors carry a grepable `code` next to the human message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::store::ChatMessage;

// =============================================================================
// INBOUND
// =============================================================================

/// Events a client may send over an open connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage(SendMessage),
    Typing(TypingState),
}

/// Chat send request. `text` is optional on the wire so an absent field is
/// reported as a validation failure rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reaction_tag: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingState {
    pub is_typing: bool,
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Events the relay delivers to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionSuccess(ConnectionSuccess),
    UserOnline(PresenceEvent),
    UserOffline(PresenceEvent),
    ReceiveMessage(MessageDelivery),
    MessageSent(MessageDelivery),
    Typing(TypingEvent),
    Error(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSuccess {
    pub message: String,
    pub participant_id: Uuid,
    pub handle: String,
}

/// Online/offline status of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    /// Handle of the participant the event is about.
    pub participant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
    pub is_online: bool,
}

/// A persisted chat message plus the sender's correlation id, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDelivery {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub is_typing: bool,
    pub participant: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for errors that reach a client.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    /// Client-facing summary. Defaults to the `Display` text.
    fn public_message(&self) -> String {
        self.to_string()
    }

    /// Optional detail line appended to the error event.
    fn details(&self) -> Option<String> {
        None
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl ServerEvent {
    /// Error event from a plain message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorEvent { message: message.into(), code: None, details: None })
    }

    /// Error event with a detail line, used for protocol errors.
    pub fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Error(ErrorEvent { message: message.into(), code: None, details: Some(details.into()) })
    }

    /// Structured error event from a typed error.
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error(ErrorEvent {
            message: err.public_message(),
            code: Some(err.error_code().to_owned()),
            details: err.details(),
        })
    }

    /// Wire name of the event, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionSuccess(_) => "connection_success",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageSent(_) => "message_sent",
            Self::Typing(_) => "typing",
            Self::Error(_) => "error",
        }
    }
}

impl From<PresenceEvent> for ServerEvent {
    fn from(event: PresenceEvent) -> Self {
        if event.is_online { Self::UserOnline(event) } else { Self::UserOffline(event) }
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
