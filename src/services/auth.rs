//! Connection authenticator — bearer credential to participant.
//!
//! Runs before the WebSocket upgrade. Every failure path returns before
//! the presence registry is touched, so a refused connection leaves no
//! trace beyond a log line.

use std::sync::Arc;

use tracing::warn;

use super::session::{TokenCodec, TokenError};
use super::store::{Participant, SessionStore, StoreError};
use crate::services::presence::ParticipantPair;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no token provided")]
    MissingCredential,
    #[error("{0}")]
    InvalidCredential(#[from] TokenError),
    #[error("invalid user")]
    UnknownSubject,
    #[error("participant is not part of this conversation")]
    NotAParticipant,
    #[error("session store error: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Whether the failure is the caller's fault (401) rather than ours (500).
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Store(_))
    }

    /// Reason surfaced to the connecting client.
    #[must_use]
    pub fn reason(&self) -> String {
        format!("Authentication error: {self}")
    }
}

/// Verify `credential` and resolve it to a participant of this conversation.
///
/// # Errors
///
/// Returns an `AuthError` for a missing, invalid or expired credential, an
/// unknown subject, a subject outside the pair, or a store failure.
pub async fn authenticate(
    store: &Arc<dyn SessionStore>,
    tokens: &TokenCodec,
    pair: &ParticipantPair,
    credential: Option<&str>,
) -> Result<Participant, AuthError> {
    let token = credential.map(str::trim).filter(|t| !t.is_empty());
    let Some(token) = token else {
        return Err(AuthError::MissingCredential);
    };

    let subject = tokens.verify(token).inspect_err(|e| warn!(error = %e, "auth: credential rejected"))?;

    let Some(participant) = store.find_participant_by_id(subject).await? else {
        warn!(%subject, "auth: credential subject not found");
        return Err(AuthError::UnknownSubject);
    };

    if !pair.contains(&participant.handle) {
        warn!(%subject, handle = %participant.handle, "auth: subject outside participant pair");
        return Err(AuthError::NotAParticipant);
    }

    Ok(participant)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
