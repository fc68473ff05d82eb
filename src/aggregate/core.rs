//! Common per-(symbol) aggregator contract shared by every signal class
//! (§4.6): a TTL-scoped `sourceId -> {value, ts}` map, weighted-sum
//! emission, confidence scoring, and mismatch detection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::bus::{create_meta, now_ms, Envelope, EventBus, MetaOpts, Source};

#[derive(Debug, Clone)]
struct SourceEntry {
    value: f64,
    ts: i64,
}

/// An aggregated signal for one symbol.
#[derive(Debug, Clone)]
pub struct AggregateEvent {
    pub symbol: String,
    pub value: f64,
    pub sources_used: Vec<String>,
    pub weights_used: HashMap<String, f64>,
    pub confidence_score: f64,
    pub mismatch_detected: bool,
}

/// `data:mismatch` payload.
#[derive(Debug, Clone)]
pub struct MismatchEvent {
    pub topic: String,
    pub symbol: String,
    pub spread: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Name used in `data:mismatch` and logging — not a bus topic itself.
    pub name: &'static str,
    pub output_topic: &'static str,
    pub ttl: Duration,
    pub expected_source_count: usize,
    pub mismatch_threshold: f64,
}

/// Per-`(symbol)` weighted aggregation over per-source readings, with TTL
/// eviction and dispersion-based mismatch detection.
pub struct Aggregator {
    config: AggregatorConfig,
    bus: Arc<EventBus>,
    weights: HashMap<String, f64>,
    state: Mutex<HashMap<String, HashMap<String, SourceEntry>>>,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig, bus: Arc<EventBus>, weights: HashMap<String, f64>) -> Self {
        Self {
            config,
            bus,
            weights,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest one per-source reading for `symbol` at exchange time `ts`,
    /// evict stale entries, and emit the current aggregate.
    pub fn ingest(&self, symbol: &str, source_id: &str, value: f64, ts: i64) {
        let now = now_ms();
        let snapshot = {
            let mut state = self.state.lock();
            let per_symbol = state.entry(symbol.to_string()).or_default();
            per_symbol.insert(source_id.to_string(), SourceEntry { value, ts });
            per_symbol.retain(|_, entry| now - entry.ts <= self.config.ttl.as_millis() as i64);
            per_symbol.clone()
        };

        if snapshot.is_empty() {
            return;
        }

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut sources_used = Vec::new();
        let mut weights_used = HashMap::new();
        let mut values = Vec::new();

        for (source, entry) in &snapshot {
            let weight = self.weights.get(source).copied().unwrap_or(1.0);
            weighted_sum += weight * entry.value;
            weight_total += weight;
            sources_used.push(source.clone());
            weights_used.insert(source.clone(), weight);
            values.push(entry.value);
        }

        let aggregate_value = if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 };
        let freshness = sources_used.len() as f64 / self.config.expected_source_count.max(1) as f64;
        let spread = spread_of(&values);
        let mismatch = spread > self.config.mismatch_threshold;
        let dispersion_penalty = if mismatch { 0.5 } else { 1.0 };
        let confidence = (freshness.min(1.0) * dispersion_penalty).clamp(0.0, 1.0);

        if mismatch {
            self.bus.publish(
                "data:mismatch",
                MismatchEvent {
                    topic: self.config.name.to_string(),
                    symbol: symbol.to_string(),
                    spread,
                    threshold: self.config.mismatch_threshold,
                },
            );
        }

        let meta = create_meta(Source::Analytics, MetaOpts { ts_event: Some(ts), ts_exchange: Some(ts), ..Default::default() });
        self.bus.publish(
            self.config.output_topic,
            Envelope {
                meta,
                payload: AggregateEvent {
                    symbol: symbol.to_string(),
                    value: aggregate_value,
                    sources_used,
                    weights_used,
                    confidence_score: confidence,
                    mismatch_detected: mismatch,
                },
            },
        );
    }
}

fn spread_of(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    let min = values.iter().cloned().fold(f64::MAX, f64::min);
    max - min
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    fn config() -> AggregatorConfig {
        AggregatorConfig {
            name: "open_interest",
            output_topic: "aggregate:open_interest",
            ttl: Duration::from_millis(60_000),
            expected_source_count: 2,
            mismatch_threshold: 0.05,
        }
    }

    #[test]
    fn weighted_average_across_two_sources() {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        bus.subscribe::<Envelope<AggregateEvent>, _>("aggregate:open_interest", move |env| {
            e.lock().push(env.payload.clone());
            Ok(())
        });
        let mut weights = HashMap::new();
        weights.insert("bybit".to_string(), 2.0);
        weights.insert("binance".to_string(), 1.0);
        let agg = Aggregator::new(config(), Arc::clone(&bus), weights);

        agg.ingest("BTCUSDT", "bybit", 100.0, 1_000);
        agg.ingest("BTCUSDT", "binance", 103.0, 1_000);

        let last = events.lock().last().cloned().unwrap();
        assert!((last.value - 101.0).abs() < 1e-9);
        assert_eq!(last.sources_used.len(), 2);
    }

    #[test]
    fn stale_sources_are_evicted_and_dropped_from_output() {
        let bus = Arc::new(EventBus::new());
        let mut cfg = config();
        cfg.ttl = Duration::from_millis(1);
        let agg = Aggregator::new(cfg, bus, HashMap::new());

        agg.ingest("BTCUSDT", "bybit", 100.0, now_ms() - 10_000);
        agg.ingest("BTCUSDT", "binance", 103.0, now_ms());
        // bybit's reading is older than the 1ms TTL relative to "now" and is
        // evicted on the next ingest; only binance contributes.
        let state = agg.state.lock();
        assert_eq!(state.get("BTCUSDT").unwrap().len(), 1);
    }

    #[test]
    fn dispersion_above_threshold_publishes_mismatch() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(Mutex::new(0u32));
        let h = Arc::clone(&hits);
        bus.subscribe::<MismatchEvent, _>("data:mismatch", move |_| {
            *h.lock() += 1;
            Ok(())
        });
        let agg = Aggregator::new(config(), Arc::clone(&bus), HashMap::new());

        agg.ingest("BTCUSDT", "bybit", 100.0, 1_000);
        agg.ingest("BTCUSDT", "binance", 150.0, 1_000);

        assert_eq!(*hits.lock(), 1);
    }
}
