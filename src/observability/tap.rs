//! Event tap: per-topic publish counters, surfaced by the health reporter.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Cheap counters a component increments as it publishes; not a bus
/// middleware, since the bus makes no provision for global hooks (every
/// topic is independently typed) — callers record explicitly at their own
/// publish sites.
#[derive(Default)]
pub struct EventTap {
    counts: Mutex<HashMap<&'static str, u64>>,
}

impl EventTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, topic: &'static str) {
        *self.counts.lock().entry(topic).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.counts.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_increments_per_topic_counter() {
        let tap = EventTap::new();
        tap.record("market:ticker");
        tap.record("market:ticker");
        tap.record("market:trade");

        let snapshot = tap.snapshot();
        assert_eq!(snapshot.get("market:ticker"), Some(&2));
        assert_eq!(snapshot.get("market:trade"), Some(&1));
    }
}
