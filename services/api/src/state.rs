//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the session
//! registry and the service configuration.

use crate::config::Config;
use std::sync::Arc;
use voice_proxy_core::SessionManager;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub config: Arc<Config>,
}
