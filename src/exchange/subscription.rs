//! Subscribe/ack tracking: pending -> active transitions, request ids, and
//! the 8s ack timeout from §4.2.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubStatus {
    Pending,
    Active,
}

#[derive(Debug, Clone)]
struct SubEntry {
    request_id: String,
    status: SubStatus,
    requested_at: Instant,
}

/// Tracks every subscription this client has asked for, keyed by topic
/// string (e.g. `orderbook.50.BTCUSDT`), so they can be replayed verbatim
/// after a reconnect and so ack timeouts can be detected.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    by_topic: HashMap<String, SubEntry>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self {
            by_topic: HashMap::new(),
        }
    }

    /// Record a newly sent subscribe request, pending ack.
    pub fn record_pending(&mut self, topic: impl Into<String>, request_id: impl Into<String>) {
        self.by_topic.insert(
            topic.into(),
            SubEntry {
                request_id: request_id.into(),
                status: SubStatus::Pending,
                requested_at: Instant::now(),
            },
        );
    }

    /// Mark the subscription whose request id matches `request_id` active.
    /// Returns the topic that transitioned, if any.
    pub fn ack(&mut self, request_id: &str) -> Option<String> {
        for (topic, entry) in self.by_topic.iter_mut() {
            if entry.request_id == request_id && entry.status == SubStatus::Pending {
                entry.status = SubStatus::Active;
                return Some(topic.clone());
            }
        }
        None
    }

    /// Topics still pending ack longer than `timeout`.
    pub fn timed_out(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        self.by_topic
            .iter()
            .filter(|(_, e)| e.status == SubStatus::Pending && now.duration_since(e.requested_at) >= timeout)
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn ack_transitions_pending_to_active() {
        let mut t = SubscriptionTracker::new();
        t.record_pending("tickers.BTCUSDT", "req-1");
        let topic = t.ack("req-1");
        assert_eq!(topic.as_deref(), Some("tickers.BTCUSDT"));
    }

    #[test]
    fn ack_with_unknown_request_id_is_ignored() {
        let mut t = SubscriptionTracker::new();
        t.record_pending("tickers.BTCUSDT", "req-1");
        assert_eq!(t.ack("req-unknown"), None);
    }

    #[test]
    fn timed_out_reports_only_pending_past_the_deadline() {
        let mut t = SubscriptionTracker::new();
        t.record_pending("tickers.BTCUSDT", "req-1");
        assert!(t.timed_out(Duration::from_millis(0)).contains(&"tickers.BTCUSDT".to_string()));

        t.ack("req-1");
        assert!(t.timed_out(Duration::from_millis(0)).is_empty());
    }

    #[test]
    fn timed_out_respects_timeout_window() {
        let mut t = SubscriptionTracker::new();
        t.record_pending("tickers.BTCUSDT", "req-1");
        sleep(Duration::from_millis(5));
        assert!(t.timed_out(Duration::from_secs(60)).is_empty());
        assert!(!t.timed_out(Duration::from_millis(1)).is_empty());
    }
}
