//! Presence broadcaster — connection tracking and refresh timers.
//!
//! DESIGN
//! ======
//! Presence events go to every open connection, not only the peer's. A
//! joining connection additionally gets a targeted snapshot of the peer.
//! While a participant is online a refresh task re-announces "online" on a
//! fixed cadence, so clients converge even if an event was dropped by a full
//! outbound queue.
//!
//! The announcements themselves are queued by the registry while it holds
//! its lock, so this module never builds a presence event from a status it
//! read earlier.
//!
//! LIFECYCLE
//! =========
//! `track` registers a connection and starts the refresh task on the
//! participant's zero-to-one transition. `release` deregisters it; on the
//! one-to-zero transition the registry aborts the task and emits the single
//! offline announcement.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use super::presence::{Connection, PresenceRegistry, Registration};
use super::store::Participant;

pub const DEFAULT_PRESENCE_REFRESH_SECS: u64 = 30;

#[derive(Clone)]
pub struct PresenceBroadcaster {
    registry: PresenceRegistry,
    refresh_every: Duration,
}

impl PresenceBroadcaster {
    #[must_use]
    pub fn new(registry: PresenceRegistry, refresh_every: Duration) -> Self {
        Self { registry, refresh_every }
    }

    /// Register `connection`, send it the current status of `peer`, and
    /// announce `participant` online to everyone. Starts the refresh task if
    /// this is the participant's first open connection.
    pub fn track(&self, connection: Connection, participant: &Participant, peer: Option<&Participant>) -> Registration {
        self.registry
            .register(connection, participant, peer, || self.spawn_refresh(participant.clone()))
    }

    /// Deregister a connection. Returns the last-seen stamp only when it was
    /// the participant's last connection and `user_offline` went out.
    pub fn release(&self, participant: &Participant, connection_id: Uuid) -> Option<DateTime<Utc>> {
        let last_seen = self.registry.deregister(participant, connection_id)?;
        info!(participant = %participant.handle, %last_seen, "broadcast: participant went offline");
        Some(last_seen)
    }

    /// Spawn the periodic "still online" announcement for `participant`.
    /// The first tick fires one full interval after start.
    pub fn spawn_refresh(&self, participant: Participant) -> AbortHandle {
        let registry = self.registry.clone();
        let period = self.refresh_every;
        let first_tick = Instant::now() + period;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(delivered) = registry.announce_if_online(&participant) else {
                    break;
                };
                debug!(participant = %participant.handle, delivered, "broadcast: presence refresh tick");
            }
        });
        task.abort_handle()
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
