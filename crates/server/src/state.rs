//! Application state shared across request handlers.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::hub::Hub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            hub: Hub::new(config.channel_capacity),
            config: Arc::new(config),
        }
    }

    /// Whether `token` opens a WebSocket. Anything goes when no token is set.
    pub fn accepts_token(&self, token: Option<&str>) -> bool {
        match &self.config.token {
            Some(expected) => token == Some(expected.as_str()),
            None => true,
        }
    }
}
