//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the session store, the credential codec, and the presence
//! registry/broadcaster pair. The registry is the only shared mutable
//! state; everything else is immutable after startup.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use crate::config::{KeepaliveConfig, RelayConfig};
use crate::services::broadcast::PresenceBroadcaster;
use crate::services::presence::PresenceRegistry;
use crate::services::session::TokenCodec;
use crate::services::store::SessionStore;

/// Per-connection settings copied out of `RelayConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub outbound_buffer: usize,
    pub keepalive: KeepaliveConfig,
    pub dev_token_issue: bool,
}

/// Shared application state, injected into Axum handlers via State extractor.
/// All inner fields are Arc-wrapped or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub tokens: TokenCodec,
    pub presence: PresenceRegistry,
    pub broadcaster: PresenceBroadcaster,
    pub settings: ConnectionSettings,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: &RelayConfig) -> Self {
        let tokens = TokenCodec::new(&config.jwt_secret, ChronoDuration::hours(config.token_ttl_hours));
        let presence = PresenceRegistry::new(config.participants.clone());
        let broadcaster = PresenceBroadcaster::new(presence.clone(), config.presence_refresh);
        Self {
            store,
            tokens,
            presence,
            broadcaster,
            settings: ConnectionSettings {
                outbound_buffer: config.outbound_buffer,
                keepalive: config.keepalive,
                dev_token_issue: config.dev_token_issue,
            },
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
