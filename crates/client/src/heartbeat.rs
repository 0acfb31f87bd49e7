//! Liveness tracking for an open link.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks inbound activity and decides when a silent link is dead.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Option<Duration>,
    last_seen: Instant,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Option<Duration>, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_seen: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Any inbound frame counts as proof of life.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => self.silence(now) > timeout,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_only_after_timeout() {
        let start = Instant::now();
        let mut monitor =
            HeartbeatMonitor::new(Duration::from_secs(30), Some(Duration::from_secs(60)), start);

        assert!(!monitor.is_stale(start + Duration::from_secs(60)));
        assert!(monitor.is_stale(start + Duration::from_secs(61)));

        monitor.record_activity(start + Duration::from_secs(50));
        assert!(!monitor.is_stale(start + Duration::from_secs(100)));
        assert_eq!(
            monitor.silence(start + Duration::from_secs(100)),
            Duration::from_secs(50)
        );
    }

    #[test]
    fn no_timeout_never_stale() {
        let start = Instant::now();
        let monitor = HeartbeatMonitor::new(Duration::from_secs(30), None, start);
        assert!(!monitor.is_stale(start + Duration::from_secs(3600)));
        assert_eq!(monitor.interval(), Duration::from_secs(30));
    }
}
