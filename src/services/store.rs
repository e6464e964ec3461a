//! Session store — participants and persisted chat messages.
//!
//! ARCHITECTURE
//! ============
//! The relay only needs three lookups/writes from durable storage, so they
//! sit behind the `SessionStore` trait. Production uses `PgStore`; tests
//! swap in the in-memory store from `test_helpers`.
//!
//! ERROR HANDLING
//! ==============
//! Store calls never retry. Callers decide whether a failure is surfaced
//! (chat send) or swallowed (typing).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

// =============================================================================
// TYPES
// =============================================================================

/// One of the two addressable identities. Created out-of-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: Uuid,
    pub handle: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A chat message as stored. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub text: String,
    pub reaction_tag: Option<String>,
    pub sender: Uuid,
    pub recipient: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Message fields supplied by the relay; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub text: String,
    pub reaction_tag: Option<String>,
    pub sender: Uuid,
    pub recipient: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::Unavailable(err.to_string()),
            other => Self::Database(other),
        }
    }
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Handles match case-insensitively.
    async fn find_participant_by_handle(&self, handle: &str) -> Result<Option<Participant>, StoreError>;

    async fn find_participant_by_id(&self, id: Uuid) -> Result<Option<Participant>, StoreError>;

    async fn create_message(&self, message: NewMessage) -> Result<ChatMessage, StoreError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

/// `SessionStore` backed by the shared SQLx pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn participant_from_row(row: &sqlx::postgres::PgRow) -> Participant {
    Participant {
        id: row.get("id"),
        handle: row.get("handle"),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn find_participant_by_handle(&self, handle: &str) -> Result<Option<Participant>, StoreError> {
        let row = sqlx::query("SELECT id, handle, display_name, avatar_url FROM participants WHERE lower(handle) = lower($1)")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(participant_from_row))
    }

    async fn find_participant_by_id(&self, id: Uuid) -> Result<Option<Participant>, StoreError> {
        let row = sqlx::query("SELECT id, handle, display_name, avatar_url FROM participants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(participant_from_row))
    }

    /// Returns the row as stored; `sent_at` keeps microsecond precision.
    async fn create_message(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        let (id, text, reaction_tag, sender, recipient, timestamp) =
            sqlx::query_as::<_, (Uuid, String, Option<String>, Uuid, Uuid, DateTime<Utc>)>(
                "INSERT INTO messages (id, text, reaction_tag, sender_id, recipient_id, sent_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id, text, reaction_tag, sender_id, recipient_id, sent_at",
            )
            .bind(Uuid::new_v4())
            .bind(&message.text)
            .bind(&message.reaction_tag)
            .bind(message.sender)
            .bind(message.recipient)
            .bind(message.timestamp)
            .fetch_one(&self.pool)
            .await?;

        Ok(ChatMessage { id, text, reaction_tag, sender, recipient, timestamp })
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
