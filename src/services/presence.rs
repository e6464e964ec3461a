//! Presence registry — who is connected, and since when they left.
//!
//! DESIGN
//! ======
//! One `PresenceEntry` per participant id holds that participant's open
//! connections (keyed by connection id), the last-seen stamp of the most
//! recent offline transition, and the abort handle of its refresh timer.
//! Online is derived: an entry is online iff its connection map is
//! non-empty.
//!
//! CONCURRENCY
//! ===========
//! All entries live behind a single `std::sync::Mutex`. Every operation is
//! synchronous and short, so register/deregister/queries are linearizable
//! and the lock is never held across an `.await`. Refresh timers are started
//! and aborted inside the same critical section that flips the participant
//! online or offline, so a timer can never outlive its last connection.
//!
//! Presence announcements are queued inside that critical section too.
//! Observers therefore see online/offline events in the same order as the
//! transitions that produced them.
//!
//! Outbound delivery is `try_send` into each connection's bounded queue;
//! a full queue drops the event for that connection only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::Participant;
use crate::event::{PresenceEvent, ServerEvent};

// =============================================================================
// PARTICIPANT PAIR
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PresenceError {
    #[error("participant pair needs exactly two distinct handles, got {0:?}")]
    InvalidPair(Vec<String>),
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),
}

/// Handles compare trimmed and case-insensitively everywhere.
fn normalize(handle: &str) -> String {
    handle.trim().to_lowercase()
}

/// The two handles that make up the conversation. Injected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantPair {
    handles: [String; 2],
}

impl ParticipantPair {
    /// Build a pair from two handles. Handles are trimmed and lower-cased.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPair` if either handle is empty or both are equal.
    pub fn new(first: &str, second: &str) -> Result<Self, PresenceError> {
        let a = normalize(first);
        let b = normalize(second);
        if a.is_empty() || b.is_empty() || a == b {
            return Err(PresenceError::InvalidPair(vec![a, b]));
        }
        Ok(Self { handles: [a, b] })
    }

    /// Parse a comma-separated list such as `"alice,bob"`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPair` unless the list names exactly two distinct handles.
    pub fn parse(raw: &str) -> Result<Self, PresenceError> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        match parts.as_slice() {
            [first, second] => Self::new(first, second),
            _ => Err(PresenceError::InvalidPair(parts.iter().map(|s| (*s).to_owned()).collect())),
        }
    }

    #[must_use]
    pub fn contains(&self, handle: &str) -> bool {
        let handle = normalize(handle);
        self.handles.iter().any(|h| *h == handle)
    }

    /// The handle that is not `handle`, in its normalized form.
    ///
    /// # Errors
    ///
    /// Returns `UnknownParticipant` if `handle` is not one of the pair.
    pub fn other_of(&self, handle: &str) -> Result<&str, PresenceError> {
        let key = normalize(handle);
        match &self.handles {
            [a, b] if *a == key => Ok(b.as_str()),
            [a, b] if *b == key => Ok(a.as_str()),
            _ => Err(PresenceError::UnknownParticipant(handle.to_owned())),
        }
    }

    #[must_use]
    pub fn handles(&self) -> [&str; 2] {
        [self.handles[0].as_str(), self.handles[1].as_str()]
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// One live channel bound to an authenticated participant.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub participant_id: Uuid,
    pub opened_at: DateTime<Utc>,
    tx: mpsc::Sender<ServerEvent>,
}

impl Connection {
    #[must_use]
    pub fn new(participant_id: Uuid, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self { id: Uuid::new_v4(), participant_id, opened_at: Utc::now(), tx }
    }

    /// Queue an event for this connection. Returns `false` if the queue is
    /// full or the connection task is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "presence: outbound queue rejected event");
                false
            }
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Per-participant presence state.
#[derive(Default)]
struct PresenceEntry {
    connections: HashMap<Uuid, Connection>,
    last_seen: Option<DateTime<Utc>>,
    refresh: Option<AbortHandle>,
}

/// Snapshot of a participant's status.
///
/// `last_seen` is the stamp of the most recent offline transition. It is
/// kept when the participant comes back, so `user_online` events tell
/// observers when the previous session ended; it is `None` only for a
/// participant who has never gone offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceStatus {
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Result of `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// The participant went from zero to one open connection.
    pub came_online: bool,
    /// Open connections for the participant after registering.
    pub connections: usize,
    /// Connections that accepted the `user_online` announcement.
    pub announced: usize,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<Uuid, PresenceEntry>,
}

impl RegistryInner {
    fn status(&self, participant_id: Uuid) -> PresenceStatus {
        self.entries
            .get(&participant_id)
            .map_or(PresenceStatus { online: false, last_seen: None }, |e| PresenceStatus {
                online: !e.connections.is_empty(),
                last_seen: e.last_seen,
            })
    }

    /// Presence event about `about` carrying its current status.
    fn presence_event(&self, about: &Participant) -> ServerEvent {
        let status = self.status(about.id);
        ServerEvent::from(PresenceEvent {
            participant: about.handle.clone(),
            last_seen: status.last_seen,
            timestamp: Utc::now(),
            is_online: status.online,
        })
    }

    fn broadcast(&self, event: &ServerEvent) -> usize {
        self.entries
            .values()
            .flat_map(|e| e.connections.values())
            .filter(|c| c.send(event.clone()))
            .count()
    }
}

/// Shared presence registry. Clone is cheap; all clones see the same state.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    pair: Arc<ParticipantPair>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new(pair: ParticipantPair) -> Self {
        Self { inner: Arc::new(Mutex::new(RegistryInner::default())), pair: Arc::new(pair) }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn pair(&self) -> &ParticipantPair {
        &self.pair
    }

    /// Handle of the other participant in the pair.
    ///
    /// # Errors
    ///
    /// Returns `UnknownParticipant` if `handle` is not one of the pair.
    pub fn other_of(&self, handle: &str) -> Result<&str, PresenceError> {
        self.pair.other_of(handle)
    }

    /// Add `connection` to `participant`'s set and announce it.
    ///
    /// In one critical section: on the zero-to-one transition any stale
    /// refresh timer is aborted and `start_refresh` is called exactly once;
    /// the new connection gets a status snapshot about `peer` (when known);
    /// then `user_online` for `participant` goes to every open connection.
    /// Re-registering the same connection id changes nothing and announces
    /// nothing.
    pub fn register<F>(
        &self,
        connection: Connection,
        participant: &Participant,
        peer: Option<&Participant>,
        start_refresh: F,
    ) -> Registration
    where
        F: FnOnce() -> AbortHandle,
    {
        debug_assert_eq!(connection.participant_id, participant.id);
        let participant_id = connection.participant_id;
        let connection_id = connection.id;

        let mut inner = self.lock();
        let entry = inner.entries.entry(participant_id).or_default();
        if entry.connections.contains_key(&connection_id) {
            return Registration { came_online: false, connections: entry.connections.len(), announced: 0 };
        }

        let came_online = entry.connections.is_empty();
        if came_online {
            if let Some(stale) = entry.refresh.take() {
                stale.abort();
            }
            entry.refresh = Some(start_refresh());
            info!(%participant_id, %connection_id, "presence: participant online");
        }
        entry.connections.insert(connection_id, connection.clone());
        let connections = entry.connections.len();

        if let Some(peer) = peer {
            connection.send(inner.presence_event(peer));
        }
        let announced = inner.broadcast(&inner.presence_event(participant));

        debug!(%participant_id, %connection_id, connections, announced, "presence: connection registered");
        Registration { came_online, connections, announced }
    }

    /// Remove a connection. If it was the participant's last one, stamp
    /// last-seen, cancel the refresh timer, announce `user_offline` to every
    /// remaining connection and return the stamp. Removing an unknown
    /// connection returns `None`, so repeated closes cannot produce a second
    /// offline transition.
    pub fn deregister(&self, participant: &Participant, connection_id: Uuid) -> Option<DateTime<Utc>> {
        let participant_id = participant.id;
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&participant_id)?;
        entry.connections.remove(&connection_id)?;

        let remaining = entry.connections.len();
        debug!(%participant_id, %connection_id, remaining, "presence: connection released");
        if remaining > 0 {
            return None;
        }

        let now = Utc::now();
        let last_seen = entry.last_seen.map_or(now, |prev| prev.max(now));
        entry.last_seen = Some(last_seen);
        if let Some(timer) = entry.refresh.take() {
            timer.abort();
        }

        let delivered = inner.broadcast(&inner.presence_event(participant));
        info!(%participant_id, %last_seen, delivered, "presence: participant offline");
        Some(last_seen)
    }

    /// Re-announce `user_online` for `participant` if it still has an open
    /// connection. Returns how many connections accepted it, or `None` when
    /// the participant is offline.
    pub fn announce_if_online(&self, participant: &Participant) -> Option<usize> {
        let inner = self.lock();
        if !inner.status(participant.id).online {
            return None;
        }
        Some(inner.broadcast(&inner.presence_event(participant)))
    }

    #[must_use]
    pub fn is_online(&self, participant_id: Uuid) -> bool {
        self.lock().status(participant_id).online
    }

    #[cfg(test)]
    #[must_use]
    pub fn status(&self, participant_id: Uuid) -> PresenceStatus {
        self.lock().status(participant_id)
    }

    /// Snapshot of a participant's open connections.
    #[cfg(test)]
    #[must_use]
    pub fn connections_of(&self, participant_id: Uuid) -> Vec<Connection> {
        self.lock()
            .entries
            .get(&participant_id)
            .map(|e| e.connections.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().entries.values().map(|e| e.connections.len()).sum()
    }

    /// Whether a refresh timer is currently held for the participant.
    #[cfg(test)]
    #[must_use]
    pub fn has_refresh_timer(&self, participant_id: Uuid) -> bool {
        self.lock()
            .entries
            .get(&participant_id)
            .is_some_and(|e| e.refresh.is_some())
    }

    /// Deliver `event` to one participant's connections, optionally skipping one.
    /// Returns how many connections accepted it.
    pub fn send_to(&self, participant_id: Uuid, event: &ServerEvent, exclude: Option<Uuid>) -> usize {
        let inner = self.lock();
        let Some(entry) = inner.entries.get(&participant_id) else {
            return 0;
        };
        entry
            .connections
            .values()
            .filter(|c| exclude != Some(c.id))
            .filter(|c| c.send(event.clone()))
            .count()
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
