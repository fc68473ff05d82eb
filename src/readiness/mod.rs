//! Market Data Readiness (§4.8): a composite status per `(symbol, marketType)`
//! gating downstream trading, built from four source blocks (price, flow,
//! liquidity, derivatives) compared against a configured expected-sources
//! list, plus a lag EWMA and a status ladder with hysteresis windows.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::{create_meta, now_ms, EventBus, MetaOpts, Source};
use crate::config::{ExpectedSourcesConfig, ReadinessConfig};
use crate::model::MarketType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Block {
    Price,
    Flow,
    Liquidity,
    Derivatives,
}

impl Block {
    const ALL: [Block; 4] = [Block::Price, Block::Flow, Block::Liquidity, Block::Derivatives];

    fn topic_key(self) -> &'static str {
        match self {
            Block::Price => "price",
            Block::Flow => "flow",
            Block::Liquidity => "liquidity",
            Block::Derivatives => "derivatives",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessStatus {
    NoData,
    Warming,
    Degraded,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DegradedReason {
    ExpectedSourceMissing,
    ConfidenceLow,
    PriceStale,
    NoValidRefPrice,
    GapsDetected,
    MismatchDetected,
    LagHigh,
    DerivativesStale,
}

impl DegradedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DegradedReason::ExpectedSourceMissing => "EXPECTED_SOURCE_MISSING",
            DegradedReason::ConfidenceLow => "CONFIDENCE_LOW",
            DegradedReason::PriceStale => "PRICE_STALE",
            DegradedReason::NoValidRefPrice => "NO_VALID_REF_PRICE",
            DegradedReason::GapsDetected => "GAPS_DETECTED",
            DegradedReason::MismatchDetected => "MISMATCH_DETECTED",
            DegradedReason::LagHigh => "LAG_HIGH",
            DegradedReason::DerivativesStale => "DERIVATIVES_STALE",
        }
    }
}

#[derive(Debug, Clone)]
struct BlockState {
    last_arrival_ms: Option<i64>,
    last_confidence: f64,
    lag_ewma_ms: f64,
    observed_sources: HashSet<String>,
}

impl Default for BlockState {
    fn default() -> Self {
        Self { last_arrival_ms: None, last_confidence: 0.0, lag_ewma_ms: 0.0, observed_sources: HashSet::new() }
    }
}

struct SymbolState {
    started_at_ms: i64,
    blocks: HashMap<Block, BlockState>,
    reasons_first_seen_ms: HashMap<DegradedReason, i64>,
    minute_start_ms: i64,
    worst_status_this_minute: ReadinessStatus,
    reasons_this_minute: HashSet<DegradedReason>,
    warnings_this_minute: HashSet<String>,
}

impl SymbolState {
    fn new(now: i64) -> Self {
        Self {
            started_at_ms: now,
            blocks: HashMap::new(),
            reasons_first_seen_ms: HashMap::new(),
            minute_start_ms: now,
            worst_status_this_minute: ReadinessStatus::NoData,
            reasons_this_minute: HashSet::new(),
            warnings_this_minute: HashSet::new(),
        }
    }
}

/// `system:market_data_status` payload.
#[derive(Debug, Clone)]
pub struct MarketDataStatusEvent {
    pub symbol: String,
    pub market_type: MarketType,
    pub warming_up: bool,
    pub degraded: bool,
    pub degraded_reasons: Vec<&'static str>,
    pub warnings: Vec<String>,
    pub overall_confidence: f64,
    pub worst_status_in_minute: &'static str,
}

fn status_label(status: ReadinessStatus) -> &'static str {
    match status {
        ReadinessStatus::NoData => "NO_DATA",
        ReadinessStatus::Warming => "WARMING",
        ReadinessStatus::Degraded => "DEGRADED",
        ReadinessStatus::Ready => "READY",
    }
}

/// One monitor instance tracks every subscribed `(symbol, marketType)` pair.
pub struct ReadinessMonitor {
    bus: Arc<EventBus>,
    config: ReadinessConfig,
    expected_sources: ExpectedSourcesConfig,
    warming_window_ms: i64,
    symbols: Mutex<HashMap<(String, MarketType), SymbolState>>,
}

impl ReadinessMonitor {
    pub fn new(bus: Arc<EventBus>, config: ReadinessConfig, expected_sources: ExpectedSourcesConfig) -> Self {
        let warming_window_ms = config.warmup_window_ms;
        Self { bus, config, expected_sources, warming_window_ms, symbols: Mutex::new(HashMap::new()) }
    }

    /// Record a fresh reading for one block of `(symbol, marketType)` and
    /// re-evaluate its status. `confidence` is the block's own `[0,1]` score
    /// (e.g. an aggregator's `confidenceScore`); `ts_event`/`ts_ingest` feed
    /// the lag EWMA.
    pub fn record_block(
        &self,
        symbol: &str,
        market_type: MarketType,
        block: Block,
        source_id: &str,
        confidence: f64,
        ts_event: i64,
        ts_ingest: i64,
    ) {
        let now = now_ms();
        let key = (symbol.to_string(), market_type);
        let mut symbols = self.symbols.lock();
        let state = symbols.entry(key).or_insert_with(|| SymbolState::new(now));
        let lag = (ts_ingest - ts_event).max(0) as f64;
        let b = state.blocks.entry(block).or_default();
        b.last_arrival_ms = Some(now);
        b.last_confidence = confidence;
        b.observed_sources.insert(source_id.to_string());
        let alpha = self.config.lag_ewma_alpha;
        b.lag_ewma_ms = if b.lag_ewma_ms == 0.0 { lag } else { alpha * lag + (1.0 - alpha) * b.lag_ewma_ms };

        drop(symbols);
        self.evaluate(symbol, market_type);
    }

    /// Records a mismatch signal so the next evaluation can surface
    /// `MISMATCH_DETECTED` within the stability window.
    pub fn record_mismatch(&self, symbol: &str, market_type: MarketType) {
        let now = now_ms();
        let key = (symbol.to_string(), market_type);
        let mut symbols = self.symbols.lock();
        let state = symbols.entry(key).or_insert_with(|| SymbolState::new(now));
        state.reasons_first_seen_ms.entry(DegradedReason::MismatchDetected).or_insert(now);
    }

    fn expected_sources_for(&self, block: Block) -> &[String] {
        self.expected_sources.expected_for(block.topic_key())
    }

    /// Recompute and publish the current status for `(symbol, marketType)`.
    fn evaluate(&self, symbol: &str, market_type: MarketType) {
        let now = now_ms();
        let key = (symbol.to_string(), market_type);
        let mut symbols = self.symbols.lock();
        let Some(state) = symbols.get_mut(&key) else { return };

        let any_fresh = state.blocks.values().any(|b| b.last_arrival_ms.is_some());
        if !any_fresh {
            self.publish_status(symbol, market_type, ReadinessStatus::NoData, Vec::new(), Vec::new(), 0.0);
            return;
        }

        let within_warmup = now - state.started_at_ms < self.warming_window_ms;
        let within_startup_grace = now - state.started_at_ms < self.config.startup_grace_ms;

        let mut candidate_reasons = Vec::new();
        for &block in &Block::ALL {
            let expected = self.expected_sources_for(block);
            let b = state.blocks.get(&block);
            if expected.is_empty() {
                continue;
            }
            let missing = match b {
                None => true,
                Some(b) => !expected.iter().all(|s| b.observed_sources.contains(s)),
            };
            if missing {
                candidate_reasons.push(DegradedReason::ExpectedSourceMissing);
            }
        }

        if let Some(price) = state.blocks.get(&Block::Price) {
            if price.last_confidence < self.config.confidence_threshold {
                candidate_reasons.push(DegradedReason::ConfidenceLow);
            }
            let stale_ms = now - price.last_arrival_ms.unwrap_or(now);
            if stale_ms > 10_000 {
                candidate_reasons.push(DegradedReason::PriceStale);
            }
        } else {
            candidate_reasons.push(DegradedReason::NoValidRefPrice);
        }

        if let Some(derivatives) = state.blocks.get(&Block::Derivatives) {
            let stale_ms = now - derivatives.last_arrival_ms.unwrap_or(now);
            if stale_ms > 120_000 {
                candidate_reasons.push(DegradedReason::DerivativesStale);
            }
        }

        for b in state.blocks.values() {
            if b.lag_ewma_ms > 5_000.0 {
                candidate_reasons.push(DegradedReason::LagHigh);
                break;
            }
        }

        if state.reasons_first_seen_ms.contains_key(&DegradedReason::MismatchDetected) {
            candidate_reasons.push(DegradedReason::MismatchDetected);
        }

        // Stability window: a reason only counts once it's persisted for
        // `stability_window_ms`; first sighting is recorded but suppressed.
        let candidate_reasons: HashSet<DegradedReason> = candidate_reasons.into_iter().collect();
        let mut stable_reasons = Vec::new();
        let mut still_seen = HashSet::new();
        for reason in candidate_reasons {
            still_seen.insert(reason);
            let first_seen = *state.reasons_first_seen_ms.entry(reason).or_insert(now);
            if now - first_seen >= self.config.stability_window_ms {
                stable_reasons.push(reason);
            }
        }
        state.reasons_first_seen_ms.retain(|reason, _| still_seen.contains(reason));

        let suppressed_by_grace = within_startup_grace;
        let degraded_reasons: Vec<DegradedReason> = if suppressed_by_grace { Vec::new() } else { stable_reasons };

        let expected_blocks: Vec<Block> =
            Block::ALL.into_iter().filter(|b| !self.expected_sources_for(*b).is_empty()).collect();
        let all_expected_fresh = expected_blocks.iter().all(|b| {
            state
                .blocks
                .get(b)
                .and_then(|bs| bs.last_arrival_ms)
                .map(|t| now - t < 30_000)
                .unwrap_or(false)
        });

        let confidences: Vec<f64> = state.blocks.values().map(|b| b.last_confidence).collect();
        let overall_confidence =
            if confidences.is_empty() { 0.0 } else { confidences.iter().sum::<f64>() / confidences.len() as f64 };

        let status = if within_warmup {
            ReadinessStatus::Warming
        } else if !degraded_reasons.is_empty() {
            ReadinessStatus::Degraded
        } else if all_expected_fresh && overall_confidence >= self.config.confidence_threshold {
            ReadinessStatus::Ready
        } else {
            ReadinessStatus::Warming
        };

        // minute bucketing
        if now - state.minute_start_ms >= 60_000 {
            state.minute_start_ms = now;
            state.worst_status_this_minute = status;
            state.reasons_this_minute.clear();
            state.warnings_this_minute.clear();
        }
        state.worst_status_this_minute = worse_of(state.worst_status_this_minute, status);
        state.reasons_this_minute.extend(degraded_reasons.iter().copied());

        let reasons_str: Vec<&'static str> = degraded_reasons.iter().map(|r| r.as_str()).collect();
        let warnings: Vec<String> = state.warnings_this_minute.iter().cloned().collect();
        let worst_label = status_label(state.worst_status_this_minute);

        drop(symbols);
        self.publish_status_with_warming(
            symbol,
            market_type,
            status,
            reasons_str,
            warnings,
            overall_confidence,
            worst_label,
        );
    }

    fn publish_status(
        &self,
        symbol: &str,
        market_type: MarketType,
        status: ReadinessStatus,
        reasons: Vec<&'static str>,
        warnings: Vec<String>,
        confidence: f64,
    ) {
        self.publish_status_with_warming(symbol, market_type, status, reasons, warnings, confidence, status_label(status));
    }

    fn publish_status_with_warming(
        &self,
        symbol: &str,
        market_type: MarketType,
        status: ReadinessStatus,
        reasons: Vec<&'static str>,
        warnings: Vec<String>,
        confidence: f64,
        worst_status_in_minute: &'static str,
    ) {
        let meta = create_meta(Source::System, MetaOpts::default());
        self.bus.publish(
            "system:market_data_status",
            crate::bus::Envelope {
                meta,
                payload: MarketDataStatusEvent {
                    symbol: symbol.to_string(),
                    market_type,
                    warming_up: matches!(status, ReadinessStatus::Warming | ReadinessStatus::NoData),
                    degraded: matches!(status, ReadinessStatus::Degraded),
                    degraded_reasons: reasons,
                    warnings,
                    overall_confidence: confidence,
                    worst_status_in_minute,
                },
            },
        );
    }

    /// Periodic re-evaluation for symbols that have gone quiet (no block
    /// update to trigger a recompute on its own).
    pub fn sweep(&self) {
        let keys: Vec<(String, MarketType)> = self.symbols.lock().keys().cloned().collect();
        for (symbol, market_type) in keys {
            self.evaluate(&symbol, market_type);
        }
    }
}

fn worse_of(a: ReadinessStatus, b: ReadinessStatus) -> ReadinessStatus {
    fn rank(s: ReadinessStatus) -> u8 {
        match s {
            ReadinessStatus::Ready => 0,
            ReadinessStatus::Warming => 1,
            ReadinessStatus::NoData => 2,
            ReadinessStatus::Degraded => 3,
        }
    }
    if rank(a) >= rank(b) {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Envelope;
    use std::collections::HashMap as Map;

    fn monitor(expected: Map<String, Vec<String>>) -> (Arc<ReadinessMonitor>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let config = ReadinessConfig {
            warmup_window_ms: 0,
            startup_grace_ms: 0,
            stability_window_ms: 0,
            lag_ewma_alpha: 0.2,
            confidence_threshold: 0.6,
        };
        let monitor = Arc::new(ReadinessMonitor::new(Arc::clone(&bus), config, ExpectedSourcesConfig(expected)));
        (monitor, bus)
    }

    #[test]
    fn no_data_before_any_block_update() {
        let (m, bus) = monitor(Map::new());
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&statuses);
        bus.subscribe::<Envelope<MarketDataStatusEvent>, _>("system:market_data_status", move |env| {
            s.lock().push(env.payload.warming_up);
            Ok(())
        });
        m.evaluate("BTCUSDT", MarketType::Futures);
        assert!(statuses.lock().is_empty() || statuses.lock()[0]);
    }

    #[test]
    fn ready_once_all_expected_blocks_are_fresh_and_confident() {
        let mut expected = Map::new();
        expected.insert("price".to_string(), vec!["bybit".to_string()]);
        let (m, bus) = monitor(expected);
        let last_status = Arc::new(Mutex::new(None));
        let l = Arc::clone(&last_status);
        bus.subscribe::<Envelope<MarketDataStatusEvent>, _>("system:market_data_status", move |env| {
            *l.lock() = Some(env.payload.degraded_reasons.is_empty() && !env.payload.warming_up);
            Ok(())
        });

        let now = now_ms();
        m.record_block("BTCUSDT", MarketType::Futures, Block::Price, "bybit", 1.0, now, now);
        assert_eq!(*last_status.lock(), Some(true));
    }

    #[test]
    fn missing_expected_source_is_degraded_after_stability_window() {
        let mut expected = Map::new();
        expected.insert("price".to_string(), vec!["bybit".to_string(), "binance".to_string()]);
        let (m, bus) = monitor(expected);
        let degraded = Arc::new(Mutex::new(false));
        let d = Arc::clone(&degraded);
        bus.subscribe::<Envelope<MarketDataStatusEvent>, _>("system:market_data_status", move |env| {
            if env.payload.degraded_reasons.contains(&"EXPECTED_SOURCE_MISSING") {
                *d.lock() = true;
            }
            Ok(())
        });

        let now = now_ms();
        m.record_block("BTCUSDT", MarketType::Futures, Block::Price, "bybit", 1.0, now, now);
        assert!(*degraded.lock());
    }
}
