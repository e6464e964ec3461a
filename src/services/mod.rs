//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own authentication, presence bookkeeping, relay logic and
//! persistence so the route handler can stay focused on protocol translation.

pub mod auth;
pub mod broadcast;
pub mod presence;
pub mod relay;
pub mod session;
pub mod store;
