//! Relay configuration parsed from environment variables.
//!
//! Required:
//! - `DATABASE_URL`
//! - `JWT_SECRET`
//! - `PARTICIPANTS`: the two handles of the conversation, e.g. `alice,bob`
//!
//! Optional (defaults in parentheses):
//! - `PORT` (3000)
//! - `TOKEN_TTL_HOURS` (168)
//! - `PRESENCE_REFRESH_SECS` (30)
//! - `OUTBOUND_BUFFER` (256)
//! - `WS_PING_INTERVAL_SECS` (25)
//! - `WS_PING_TIMEOUT_SECS` (60)
//! - `DEV_TOKEN_ISSUE` (off)

use std::time::Duration;

use crate::services::broadcast::DEFAULT_PRESENCE_REFRESH_SECS;
use crate::services::presence::{ParticipantPair, PresenceError};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24 * 7;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;
pub const DEFAULT_WS_PING_INTERVAL_SECS: u64 = 25;
pub const DEFAULT_WS_PING_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid PARTICIPANTS: {0}")]
    Participants(#[from] PresenceError),
    #[error("WS_PING_TIMEOUT_SECS ({timeout}) must exceed WS_PING_INTERVAL_SECS ({interval})")]
    PingWindow { interval: u64, timeout: u64 },
}

/// Keepalive timing for WebSocket connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(DEFAULT_WS_PING_INTERVAL_SECS),
            ping_timeout: Duration::from_secs(DEFAULT_WS_PING_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub participants: ParticipantPair,
    pub token_ttl_hours: i64,
    pub presence_refresh: Duration,
    pub outbound_buffer: usize,
    pub keepalive: KeepaliveConfig,
    pub dev_token_issue: bool,
}

impl RelayConfig {
    /// Build typed relay config from environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a required variable is missing, the
    /// participant pair is invalid, or the keepalive window is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;
        let participants = ParticipantPair::parse(&required("PARTICIPANTS")?)?;

        let interval = env_parse("WS_PING_INTERVAL_SECS", DEFAULT_WS_PING_INTERVAL_SECS).max(1);
        let timeout = env_parse("WS_PING_TIMEOUT_SECS", DEFAULT_WS_PING_TIMEOUT_SECS);
        if timeout <= interval {
            return Err(ConfigError::PingWindow { interval, timeout });
        }

        Ok(Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url,
            jwt_secret,
            participants,
            token_ttl_hours: env_parse("TOKEN_TTL_HOURS", DEFAULT_TOKEN_TTL_HOURS),
            presence_refresh: Duration::from_secs(env_parse("PRESENCE_REFRESH_SECS", DEFAULT_PRESENCE_REFRESH_SECS).max(1)),
            outbound_buffer: env_parse("OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER).max(1),
            keepalive: KeepaliveConfig {
                ping_interval: Duration::from_secs(interval),
                ping_timeout: Duration::from_secs(timeout),
            },
            dev_token_issue: env_bool("DEV_TOKEN_ISSUE").unwrap_or(false),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
