//! Per-symbol derivatives poller: open interest and funding rate, each on
//! its own timer, with exponential backoff and abort-on-stop (§4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::bus::{create_meta, now_ms, Envelope, EventBus, MetaOpts, Source};
use crate::exchange::backoff::rest_backoff_ms;
use crate::exchange::dedup::Deduplicator;
use crate::exchange::venues::bybit::BybitAdapter;
use crate::model::Symbol;
use crate::rest::client::{ClassifiedError, RestClient};

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub oi_interval: Duration,
    pub funding_interval: Duration,
    pub base_backoff_ms: u64,
    /// Minimum gap between repeated throttled warnings for the same
    /// `(symbol, endpoint)` key.
    pub warn_throttle: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            oi_interval: Duration::from_secs(30),
            funding_interval: Duration::from_secs(60),
            base_backoff_ms: 1_000,
            warn_throttle: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct SymbolState {
    oi_failures: u32,
    oi_next_allowed_ms: i64,
    oi_inflight: bool,
    funding_failures: u32,
    funding_next_allowed_ms: i64,
    funding_inflight: bool,
    last_warn_ms: HashMap<&'static str, i64>,
}

pub struct DerivativesPoller {
    client: RestClient,
    bus: Arc<EventBus>,
    adapter: Arc<BybitAdapter>,
    config: PollerConfig,
    symbols: Vec<Symbol>,
    state: Mutex<HashMap<Symbol, SymbolState>>,
    funding_dedup: Deduplicator,
    stopped: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DerivativesPoller {
    pub fn new(
        client: RestClient,
        bus: Arc<EventBus>,
        adapter: Arc<BybitAdapter>,
        config: PollerConfig,
        symbols: Vec<Symbol>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            bus,
            adapter,
            config,
            symbols,
            state: Mutex::new(HashMap::new()),
            funding_dedup: Deduplicator::new(Duration::from_secs(3_600), 10_000),
            stopped: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts one OI loop and one funding loop per configured symbol.
    pub fn spawn(self: &Arc<Self>) {
        let mut handles = Vec::new();
        for symbol in self.symbols.clone() {
            let this = Arc::clone(self);
            let sym = symbol.clone();
            handles.push(tokio::spawn(async move { this.oi_loop(sym).await }));

            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move { this.funding_loop(symbol).await }));
        }
        self.tasks.lock().extend(handles);
    }

    /// Aborts every in-flight timer/request loop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    async fn oi_loop(self: Arc<Self>, symbol: Symbol) {
        let mut ticker = tokio::time::interval(self.config.oi_interval);
        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            self.poll_oi(&symbol).await;
        }
    }

    async fn funding_loop(self: Arc<Self>, symbol: Symbol) {
        let mut ticker = tokio::time::interval(self.config.funding_interval);
        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            self.poll_funding(&symbol).await;
        }
    }

    async fn poll_oi(&self, symbol: &Symbol) {
        {
            let mut state = self.state.lock();
            let s = state.entry(symbol.clone()).or_default();
            if s.oi_inflight || now_ms() < s.oi_next_allowed_ms {
                return;
            }
            s.oi_inflight = true;
        }

        let result = self
            .client
            .get_json(
                "/v5/market/open-interest",
                &[("category", self.adapter.category()), ("symbol", symbol.as_str())],
            )
            .await;

        match result {
            Ok(resp) => {
                let mut state = self.state.lock();
                let s = state.entry(symbol.clone()).or_default();
                s.oi_inflight = false;
                s.oi_failures = 0;
                s.oi_next_allowed_ms = 0;
                drop(state);
                self.emit_open_interest(symbol, &resp.data);
            }
            Err(err) => {
                let (failures, delay) = {
                    let mut state = self.state.lock();
                    let s = state.entry(symbol.clone()).or_default();
                    s.oi_inflight = false;
                    s.oi_failures += 1;
                    let delay = rest_backoff_ms(self.config.base_backoff_ms, s.oi_failures, symbol.as_str());
                    s.oi_next_allowed_ms = now_ms() + delay as i64;
                    (s.oi_failures, delay)
                };
                self.throttled_warn(symbol, "oi", &err, failures, delay);
            }
        }
    }

    async fn poll_funding(&self, symbol: &Symbol) {
        {
            let mut state = self.state.lock();
            let s = state.entry(symbol.clone()).or_default();
            if s.funding_inflight || now_ms() < s.funding_next_allowed_ms {
                return;
            }
            s.funding_inflight = true;
        }

        let result = self
            .client
            .get_json(
                "/v5/market/funding/history",
                &[("category", self.adapter.category()), ("symbol", symbol.as_str()), ("limit", "1")],
            )
            .await;

        match result {
            Ok(resp) => {
                let mut state = self.state.lock();
                let s = state.entry(symbol.clone()).or_default();
                s.funding_inflight = false;
                s.funding_failures = 0;
                s.funding_next_allowed_ms = 0;
                drop(state);
                self.emit_funding(symbol, &resp.data);
            }
            Err(err) => {
                let (failures, delay) = {
                    let mut state = self.state.lock();
                    let s = state.entry(symbol.clone()).or_default();
                    s.funding_inflight = false;
                    s.funding_failures += 1;
                    let delay = rest_backoff_ms(self.config.base_backoff_ms, s.funding_failures, symbol.as_str());
                    s.funding_next_allowed_ms = now_ms() + delay as i64;
                    (s.funding_failures, delay)
                };
                self.throttled_warn(symbol, "funding", &err, failures, delay);
            }
        }
    }

    fn emit_open_interest(&self, symbol: &Symbol, result: &Value) {
        let rows = result.get("list").and_then(Value::as_array).cloned().unwrap_or_default();
        for row in rows.iter().rev() {
            if let Some(oi) = self.adapter.parse_open_interest_row(symbol.as_str(), row) {
                let ts = oi.exchange_ts;
                let meta = create_meta(Source::Market, MetaOpts { ts_event: Some(ts), ts_exchange: Some(ts), ..Default::default() });
                self.bus.publish("market:open_interest", Envelope { meta, payload: oi });
            }
        }
    }

    fn emit_funding(&self, symbol: &Symbol, result: &Value) {
        let rows = result.get("list").and_then(Value::as_array).cloned().unwrap_or_default();
        for row in rows.iter().rev() {
            if let Some(rate) = self.adapter.parse_funding_row(symbol.as_str(), row) {
                let dedup_key = format!("{}:{}", symbol.as_str(), rate.exchange_ts);
                if self.funding_dedup.is_duplicate(&dedup_key) {
                    continue;
                }
                let ts = rate.exchange_ts;
                let meta = create_meta(Source::Market, MetaOpts { ts_event: Some(ts), ts_exchange: Some(ts), ..Default::default() });
                self.bus.publish("market:funding_rate", Envelope { meta, payload: rate });
            }
        }
    }

    fn throttled_warn(&self, symbol: &Symbol, endpoint: &'static str, err: &ClassifiedError, attempt: u32, backoff_ms: u64) {
        let mut state = self.state.lock();
        let s = state.entry(symbol.clone()).or_default();
        let now = now_ms();
        let last = s.last_warn_ms.get(endpoint).copied().unwrap_or(0);
        if now - last < self.config.warn_throttle.as_millis() as i64 {
            return;
        }
        s.last_warn_ms.insert(endpoint, now);
        drop(state);

        warn!(
            symbol = symbol.as_str(),
            endpoint,
            category = ?err.category,
            status = err.meta.http_status,
            retry_after_ms = err.meta.retry_after.map(|d| d.as_millis()),
            attempt,
            backoff_ms,
            "derivatives poll failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::venues::bybit::BybitAdapter;

    fn poller() -> Arc<DerivativesPoller> {
        let client = RestClient::new("https://api.bybit.com").unwrap();
        let bus = Arc::new(EventBus::new());
        let adapter = Arc::new(BybitAdapter::linear("wss://unused"));
        DerivativesPoller::new(client, bus, adapter, PollerConfig::default(), vec![Symbol::new("BTCUSDT")])
    }

    #[test]
    fn emit_open_interest_parses_list_rows() {
        let p = poller();
        let result = serde_json::json!({"list": [{"openInterest": "123.5", "timestamp": "1700000000000"}]});
        p.emit_open_interest(&Symbol::new("BTCUSDT"), &result);
        // No panic and no observable state beyond the bus publish; a
        // listening subscriber is exercised in the gateway integration test.
    }

    #[test]
    fn funding_dedup_suppresses_repeat_exchange_ts() {
        let p = poller();
        let result = serde_json::json!({"list": [{"fundingRate": "0.0001", "fundingRateTimestamp": "1700000000000"}]});
        p.emit_funding(&Symbol::new("BTCUSDT"), &result);
        assert!(p.funding_dedup.is_duplicate(&format!("BTCUSDT:{}", 1_700_000_000_000i64)));
    }

    #[tokio::test]
    async fn stop_aborts_spawned_loops() {
        let p = poller();
        p.spawn();
        assert_eq!(p.tasks.lock().len(), 2);
        p.stop();
        assert!(p.tasks.lock().is_empty());
    }
}
