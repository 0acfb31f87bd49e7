//! FIFO buffer for messages sent while the link is down.

use std::collections::VecDeque;

use tally_shared::Envelope;

#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<Envelope>,
}

/// Result of one [`OutboundQueue::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub remaining: usize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Envelope) {
        self.entries.push_back(message);
    }

    /// Hand entries to `write` front to back. The first refused entry and
    /// everything behind it stay queued, in order.
    pub fn flush(&mut self, mut write: impl FnMut(&Envelope) -> bool) -> FlushReport {
        let mut sent = 0;
        while let Some(front) = self.entries.front() {
            if !write(front) {
                break;
            }
            self.entries.pop_front();
            sent += 1;
        }
        FlushReport {
            sent,
            remaining: self.entries.len(),
        }
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(n: i64) -> Envelope {
        Envelope::new("ping", json!({ "n": n }))
    }

    #[test]
    fn flushes_in_order() {
        let mut queue = OutboundQueue::new();
        for n in 0..4 {
            queue.push(msg(n));
        }

        let mut seen = Vec::new();
        let report = queue.flush(|m| {
            seen.push(m.payload["n"].as_i64().unwrap());
            true
        });
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(report, FlushReport { sent: 4, remaining: 0 });
        assert!(queue.is_empty());
    }

    #[test]
    fn failed_write_keeps_rest_in_order() {
        let mut queue = OutboundQueue::new();
        for n in 0..5 {
            queue.push(msg(n));
        }

        let mut budget = 2;
        let report = queue.flush(|_| {
            if budget == 0 {
                return false;
            }
            budget -= 1;
            true
        });
        assert_eq!(report, FlushReport { sent: 2, remaining: 3 });

        let mut rest = Vec::new();
        queue.flush(|m| {
            rest.push(m.payload["n"].as_i64().unwrap());
            true
        });
        assert_eq!(rest, vec![2, 3, 4]);
    }

    #[test]
    fn clear_reports_dropped() {
        let mut queue = OutboundQueue::new();
        queue.push(msg(1));
        queue.push(msg(2));
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.len(), 0);
    }
}
