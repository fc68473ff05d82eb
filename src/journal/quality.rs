//! Quality detectors computed before enqueueing a record (§4.5). These never
//! block the append path; they only publish bus events.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::EventBus;

/// Per-topic-directory gap thresholds (milliseconds).
pub fn default_gap_threshold_ms(topic_dir: &str) -> i64 {
    match topic_dir {
        "market-open-interest" => 120_000,
        "market-funding-rate" => 300_000,
        _ => 5_000,
    }
}

#[derive(Debug, Clone)]
pub struct GapEvent {
    pub key: String,
    pub gap_ms: i64,
}

#[derive(Debug, Clone)]
pub struct OutOfOrderEvent {
    pub key: String,
    pub curr_ts: i64,
    pub prev_ts: i64,
}

#[derive(Debug, Clone)]
pub struct DuplicateEvent {
    pub key: String,
    pub ts: i64,
}

#[derive(Debug, Clone)]
pub struct LatencySpikeEvent {
    pub key: String,
    pub latency_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceIssueKind {
    OutOfOrder,
    Duplicate,
    Gap,
}

#[derive(Debug, Clone)]
pub struct SequenceIssueEvent {
    pub key: String,
    pub kind: SequenceIssueKind,
    pub seq: u64,
    pub prev_seq: u64,
}

/// Tracks per-key (`{topic}:{symbol}` style) arrival history to detect gaps,
/// out-of-order arrivals, duplicates, latency spikes, and order-book
/// sequence discontinuities.
pub struct QualityDetector {
    bus: Arc<EventBus>,
    latency_spike_ms: i64,
    last_exchange_ts: Mutex<HashMap<String, i64>>,
    last_seq: Mutex<HashMap<String, u64>>,
    last_trade: Mutex<HashMap<String, (i64, Option<String>)>>,
}

impl QualityDetector {
    pub fn new(bus: Arc<EventBus>, latency_spike_ms: i64) -> Self {
        Self {
            bus,
            latency_spike_ms,
            last_exchange_ts: Mutex::new(HashMap::new()),
            last_seq: Mutex::new(HashMap::new()),
            last_trade: Mutex::new(HashMap::new()),
        }
    }

    /// Gap / out-of-order / duplicate / latency-spike checks keyed on
    /// `ts_exchange`, applicable to tickers, OI, funding, and klines.
    pub fn check_timestamp(&self, key: &str, topic_dir: &str, ts_exchange: Option<i64>, ts_ingest: i64) {
        let Some(ts) = ts_exchange else { return };

        let mut last_map = self.last_exchange_ts.lock();
        if let Some(&prev) = last_map.get(key) {
            let gap = ts - prev;
            if gap > default_gap_threshold_ms(topic_dir) {
                self.bus.publish("data:gapDetected", GapEvent { key: key.to_string(), gap_ms: gap });
            }
            if ts < prev {
                self.bus.publish(
                    "data:time_out_of_order",
                    OutOfOrderEvent { key: key.to_string(), curr_ts: ts, prev_ts: prev },
                );
            } else if ts == prev {
                self.bus.publish("data:duplicateDetected", DuplicateEvent { key: key.to_string(), ts });
            }
        }
        last_map.insert(key.to_string(), ts);
        drop(last_map);

        let latency = ts_ingest - ts;
        if latency > self.latency_spike_ms {
            self.bus.publish(
                "data:latencySpike",
                LatencySpikeEvent { key: key.to_string(), latency_ms: latency },
            );
        }
    }

    /// Order-book `updateId` discontinuity check (§4.5).
    pub fn check_sequence(&self, key: &str, seq: u64) {
        let mut last_map = self.last_seq.lock();
        if let Some(&prev) = last_map.get(key) {
            let kind = if seq == prev {
                Some(SequenceIssueKind::Duplicate)
            } else if seq < prev {
                Some(SequenceIssueKind::OutOfOrder)
            } else if seq > prev + 1 {
                Some(SequenceIssueKind::Gap)
            } else {
                None
            };
            if let Some(kind) = kind {
                self.bus.publish(
                    "data:sequence_gap_or_out_of_order",
                    SequenceIssueEvent { key: key.to_string(), kind, seq, prev_seq: prev },
                );
            }
        }
        if seq > *last_map.get(key).unwrap_or(&0) {
            last_map.insert(key.to_string(), seq);
        }
    }

    /// Trade duplicate detection by `(trade_ts, trade_id)`, mirroring
    /// [`crate::model::Trade::is_duplicate_of`]. Returns whether `ts`/`trade_id`
    /// duplicates the immediately preceding trade for `key`.
    pub fn check_trade_duplicate(&self, key: &str, ts: i64, trade_id: Option<&str>) -> bool {
        let mut last = self.last_trade.lock();
        let is_duplicate = match last.get(key) {
            Some((prev_ts, prev_id)) => {
                *prev_ts == ts
                    && match (prev_id, trade_id) {
                        (Some(a), Some(b)) => a == b,
                        (None, None) => true,
                        _ => false,
                    }
            }
            None => false,
        };
        if is_duplicate {
            self.bus.publish("data:duplicateDetected", DuplicateEvent { key: key.to_string(), ts });
        } else if ts < last.get(key).map(|(p, _)| *p).unwrap_or(i64::MIN) {
            self.bus.publish(
                "data:time_out_of_order",
                OutOfOrderEvent {
                    key: key.to_string(),
                    curr_ts: ts,
                    prev_ts: last.get(key).map(|(p, _)| *p).unwrap_or(ts),
                },
            );
        }
        last.insert(key.to_string(), (ts, trade_id.map(String::from)));
        is_duplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_trade_same_ts_and_id_is_flagged() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(Mutex::new(0u32));
        let h = Arc::clone(&hits);
        bus.subscribe::<DuplicateEvent, _>("data:duplicateDetected", move |_| {
            *h.lock() += 1;
            Ok(())
        });
        let detector = QualityDetector::new(Arc::clone(&bus), 2_000);

        assert!(!detector.check_trade_duplicate("BTCUSDT", 1, Some("a")));
        assert!(detector.check_trade_duplicate("BTCUSDT", 1, Some("a")));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn out_of_order_trade_ts_is_flagged() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(Mutex::new(0u32));
        let h = Arc::clone(&hits);
        bus.subscribe::<OutOfOrderEvent, _>("data:time_out_of_order", move |_| {
            *h.lock() += 1;
            Ok(())
        });
        let detector = QualityDetector::new(Arc::clone(&bus), 2_000);

        detector.check_trade_duplicate("BTCUSDT", 10, Some("a"));
        detector.check_trade_duplicate("BTCUSDT", 5, Some("b"));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn sequence_gap_is_tagged_correctly() {
        let bus = Arc::new(EventBus::new());
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let k = Arc::clone(&kinds);
        bus.subscribe::<SequenceIssueEvent, _>("data:sequence_gap_or_out_of_order", move |e| {
            k.lock().push(e.kind);
            Ok(())
        });
        let detector = QualityDetector::new(Arc::clone(&bus), 2_000);

        detector.check_sequence("BTCUSDT", 10);
        detector.check_sequence("BTCUSDT", 11);
        detector.check_sequence("BTCUSDT", 15);
        assert_eq!(*kinds.lock(), vec![SequenceIssueKind::Gap]);
    }

    #[test]
    fn gap_and_latency_spike_detected_on_timestamp_checks() {
        let bus = Arc::new(EventBus::new());
        let gaps = Arc::new(Mutex::new(0u32));
        let spikes = Arc::new(Mutex::new(0u32));
        let g = Arc::clone(&gaps);
        bus.subscribe::<GapEvent, _>("data:gapDetected", move |_| {
            *g.lock() += 1;
            Ok(())
        });
        let s = Arc::clone(&spikes);
        bus.subscribe::<LatencySpikeEvent, _>("data:latencySpike", move |_| {
            *s.lock() += 1;
            Ok(())
        });
        let detector = QualityDetector::new(Arc::clone(&bus), 2_000);

        detector.check_timestamp("tickers:BTCUSDT", "market-ticker", Some(0), 500);
        detector.check_timestamp("tickers:BTCUSDT", "market-ticker", Some(10_000), 10_500);
        assert_eq!(*gaps.lock(), 1);
        assert_eq!(*spikes.lock(), 0);

        detector.check_timestamp("tickers:BTCUSDT", "market-ticker", Some(13_000), 16_000);
        assert_eq!(*spikes.lock(), 1);
    }
}
