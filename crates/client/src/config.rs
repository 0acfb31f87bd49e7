//! Client configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reconnect::ReconnectPolicy;

/// Options for the realtime client and its notification center.
///
/// Every field has a default, so partial JSON documents deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    /// Master switch. When false the client never opens a connection.
    pub enabled: bool,
    /// WebSocket endpoint. May also be supplied to `connect`.
    pub url: Option<String>,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Silence longer than this counts as a dropped link. 0 disables.
    pub heartbeat_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_notifications: usize,
    /// Unread notifications older than this are marked read. 0 disables.
    pub auto_mark_read_after_ms: u64,
    pub show_toasts: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
            max_notifications: 50,
            auto_mark_read_after_ms: 30_000,
            show_toasts: true,
        }
    }
}

impl RealtimeConfig {
    /// Build a configuration from environment variables.
    ///
    /// Environment variables (all optional):
    /// - `TALLY_REALTIME_ENABLED`: "true" | "false"
    /// - `TALLY_WS_URL`: endpoint, e.g. "ws://localhost:8080/api/ws"
    /// - `TALLY_MAX_RECONNECT_ATTEMPTS`, `TALLY_RECONNECT_BASE_DELAY_MS`
    /// - `TALLY_HEARTBEAT_INTERVAL_MS`, `TALLY_HEARTBEAT_TIMEOUT_MS`
    /// - `TALLY_CONNECT_TIMEOUT_MS`
    /// - `TALLY_MAX_NOTIFICATIONS`, `TALLY_AUTO_MARK_READ_AFTER_MS`, `TALLY_SHOW_TOASTS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let url = lookup("TALLY_WS_URL")
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        Self {
            enabled: parse_or(&lookup, "TALLY_REALTIME_ENABLED", defaults.enabled),
            url,
            max_reconnect_attempts: parse_or(
                &lookup,
                "TALLY_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            reconnect_base_delay_ms: parse_or(
                &lookup,
                "TALLY_RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay_ms,
            ),
            heartbeat_interval_ms: parse_or(
                &lookup,
                "TALLY_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval_ms,
            ),
            heartbeat_timeout_ms: parse_or(
                &lookup,
                "TALLY_HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat_timeout_ms,
            ),
            connect_timeout_ms: parse_or(
                &lookup,
                "TALLY_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout_ms,
            ),
            max_notifications: parse_or(
                &lookup,
                "TALLY_MAX_NOTIFICATIONS",
                defaults.max_notifications,
            ),
            auto_mark_read_after_ms: parse_or(
                &lookup,
                "TALLY_AUTO_MARK_READ_AFTER_MS",
                defaults.auto_mark_read_after_ms,
            ),
            show_toasts: parse_or(&lookup, "TALLY_SHOW_TOASTS", defaults.show_toasts),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        (self.heartbeat_timeout_ms > 0).then(|| Duration::from_millis(self.heartbeat_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn auto_mark_read_after(&self) -> Option<Duration> {
        (self.auto_mark_read_after_ms > 0)
            .then(|| Duration::from_millis(self.auto_mark_read_after_ms))
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable setting");
                default
            }
        },
        None => default,
    }
}
