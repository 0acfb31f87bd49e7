//! Relay configuration from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    /// When set, WebSocket clients must present this as `?token=`.
    pub token: Option<String>,
    /// Per-channel broadcast buffer. Slow subscribers past this lag and skip.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            token: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// Environment variables:
    /// - `TALLY_RELAY_ADDR`: listen address (default: "0.0.0.0:8080")
    /// - `TALLY_RELAY_TOKEN`: shared session token (default: none, open relay)
    /// - `TALLY_RELAY_CHANNEL_CAPACITY`: per-channel buffer (default: 100)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            addr: parse_or(&lookup, "TALLY_RELAY_ADDR", defaults.addr),
            token: lookup("TALLY_RELAY_TOKEN").filter(|t| !t.trim().is_empty()),
            channel_capacity: parse_or(
                &lookup,
                "TALLY_RELAY_CHANNEL_CAPACITY",
                defaults.channel_capacity,
            )
            .max(1),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = %raw, "ignoring unparseable setting");
        default
    })
}
