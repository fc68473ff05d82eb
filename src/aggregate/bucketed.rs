//! Bucketed aggregators (§4.6): CVD, liquidations, and liquidity align
//! inputs to a fixed-width bucket and emit once a bucket closes, with
//! `ts = bucketEndTs`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::{create_meta, Envelope, EventBus, MetaOpts, Source};

#[derive(Debug, Clone, Default)]
struct BucketState {
    sum: f64,
    sources: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct BucketedAggregateEvent {
    pub symbol: String,
    pub bucket_end_ts: i64,
    pub value: f64,
    pub sources_used: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BucketedAggregatorConfig {
    pub output_topic: &'static str,
    pub bucket_ms: i64,
}

/// Per-symbol accumulator over fixed-width time buckets. A reading that
/// falls in a later bucket than the one currently open flushes the closed
/// bucket before starting a new one — this is what guarantees aggregators
/// emit in non-decreasing `bucketEndTs` order (§5).
pub struct BucketedAggregator {
    config: BucketedAggregatorConfig,
    bus: Arc<EventBus>,
    state: Mutex<HashMap<String, (i64, BucketState)>>,
}

impl BucketedAggregator {
    pub fn new(config: BucketedAggregatorConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            bus,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_end(&self, ts: i64) -> i64 {
        let bucket_ms = self.config.bucket_ms;
        (ts / bucket_ms + 1) * bucket_ms
    }

    /// Ingest one per-source delta (signed trade volume, liquidation
    /// notional, book-depth sample) for `symbol` at exchange time `ts`.
    pub fn ingest(&self, symbol: &str, source_id: &str, delta: f64, ts: i64) {
        let bucket_end_ts = self.bucket_end(ts);
        let mut closed: Option<(i64, BucketState)> = None;
        {
            let mut state = self.state.lock();
            let (current_end, bucket) = state
                .entry(symbol.to_string())
                .or_insert_with(|| (bucket_end_ts, BucketState::default()));
            if bucket_end_ts > *current_end {
                closed = Some((*current_end, std::mem::take(bucket)));
                *current_end = bucket_end_ts;
            }
            *bucket.sources.entry(source_id.to_string()).or_insert(0.0) += delta;
            bucket.sum += delta;
        }
        if let Some((closed_end, closed_state)) = closed {
            self.emit(symbol, closed_end, closed_state);
        }
    }

    fn emit(&self, symbol: &str, bucket_end_ts: i64, state: BucketState) {
        if state.sources.is_empty() {
            return;
        }
        let meta = create_meta(Source::Analytics, MetaOpts { ts_event: Some(bucket_end_ts), ..Default::default() });
        self.bus.publish(
            self.config.output_topic,
            Envelope {
                meta,
                payload: BucketedAggregateEvent {
                    symbol: symbol.to_string(),
                    bucket_end_ts,
                    value: state.sum,
                    sources_used: state.sources.keys().cloned().collect(),
                },
            },
        );
    }
}
