//! Market gateway: event-driven composition of one WS client, one REST
//! client, and one derivatives poller. Topic routing, kline bootstrap, and
//! resync throttling (§4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::bus::{create_meta, now_ms, Envelope, EventBus, MetaOpts, Source};
use crate::exchange::orderbook_seq::ResyncReason;
use crate::exchange::transport::TungsteniteTransport;
use crate::exchange::venues::bybit::BybitAdapter;
use crate::exchange::venues::KlineRestAdapter;
use crate::exchange::ws_client::WsClient;
use crate::exchange::ResyncEvent;
use crate::model::{Interval, MarketType, Symbol, Venue};
use crate::rest::{DerivativesPoller, RestClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncStrategy {
    /// Only log that a resync was requested; the sequence tracker already
    /// dropped the offending delta.
    Ignore,
    /// Disconnect, reconnect, and replay stored subscriptions so a fresh
    /// snapshot arrives.
    Reconnect,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub venue: Venue,
    pub market_type: MarketType,
    pub resync_channel_cooldown: Duration,
    pub resync_reason_cooldown: Duration,
    pub bootstrap_warn_throttle: Duration,
    pub resync_strategy: ResyncStrategy,
    /// Subscribe args a single socket is allowed to carry before the shard
    /// planner starts recommending a second one.
    pub max_subscriptions_per_connection: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            venue: Venue::Bybit,
            market_type: MarketType::Futures,
            resync_channel_cooldown: Duration::from_secs(5),
            resync_reason_cooldown: Duration::from_secs(2),
            bootstrap_warn_throttle: Duration::from_secs(30),
            resync_strategy: ResyncStrategy::Reconnect,
            max_subscriptions_per_connection: 190,
        }
    }
}

/// How many sockets a symbol list would need and how symbols distribute
/// across them, the way the teacher's `ConnectionPoolConfig` sizes its pool
/// from `max_connections`/`subscriptions_per_connection`. Only the
/// single-shard path is wired up end-to-end today; this is the sizing
/// calculation a multi-socket gateway would consult before opening the
/// second connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    pub num_shards: usize,
    pub symbols_per_shard: usize,
}

impl ShardPlan {
    /// `channels_per_symbol` is how many subscribe args one symbol costs on
    /// this venue (ticker + trades + orderbook + kline [+ liquidations]).
    pub fn compute(symbol_count: usize, max_subscriptions_per_connection: usize, channels_per_symbol: usize) -> Self {
        if symbol_count == 0 || channels_per_symbol == 0 {
            return ShardPlan { num_shards: 1, symbols_per_shard: symbol_count };
        }
        let symbols_per_shard = (max_subscriptions_per_connection / channels_per_symbol).max(1);
        let num_shards = symbol_count.div_ceil(symbols_per_shard).max(1);
        ShardPlan { num_shards, symbols_per_shard }
    }
}

/// `market:subscribe` payload: a topic string per the routing table below.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub topic: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectCommand;

#[derive(Debug, Clone, Default)]
pub struct DisconnectCommand;

/// `market:kline_bootstrap_requested` payload.
#[derive(Debug, Clone)]
pub struct KlineBootstrapRequest {
    pub symbol: Symbol,
    pub interval: Interval,
    pub since_ts: i64,
    pub limit: u32,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KlineBootstrapCompleted {
    pub symbol: Symbol,
    pub interval: Interval,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct KlineBootstrapFailed {
    pub symbol: Symbol,
    pub interval: Interval,
    pub reason: String,
}

#[derive(Default)]
struct ResyncThrottleState {
    inflight: bool,
    last_channel_ms: i64,
    last_reason_ms: HashMap<ResyncReason, i64>,
}

/// Composes one WS client, one REST client, and one poller for a single
/// `(venue, marketType)`. Bybit-concrete for now — the same shape
/// generalizes to other venues by swapping the adapter type parameter.
pub struct MarketGateway {
    config: GatewayConfig,
    bus: Arc<EventBus>,
    ws: Arc<WsClient<TungsteniteTransport, BybitAdapter>>,
    rest: RestClient,
    rest_adapter: Arc<BybitAdapter>,
    poller: Arc<DerivativesPoller>,
    topic_filter: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
    resync_state: Mutex<HashMap<(Symbol, String), ResyncThrottleState>>,
    bootstrap_last_warn_ms: Mutex<HashMap<(Symbol, &'static str), i64>>,
}

impl MarketGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GatewayConfig,
        bus: Arc<EventBus>,
        ws: Arc<WsClient<TungsteniteTransport, BybitAdapter>>,
        rest: RestClient,
        rest_adapter: Arc<BybitAdapter>,
        poller: Arc<DerivativesPoller>,
        topic_filter: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            ws,
            rest,
            rest_adapter,
            poller,
            topic_filter,
            resync_state: Mutex::new(HashMap::new()),
            bootstrap_last_warn_ms: Mutex::new(HashMap::new()),
        })
    }

    /// Sharding recommendation for `symbol_count` symbols under this
    /// gateway's configured per-connection subscription ceiling.
    pub fn shard_plan(&self, symbol_count: usize, channels_per_symbol: usize) -> ShardPlan {
        ShardPlan::compute(symbol_count, self.config.max_subscriptions_per_connection, channels_per_symbol)
    }

    /// Registers every bus listener this gateway owns. Call once.
    pub fn install(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.bus.subscribe::<SubscribeRequest, _>("market:subscribe", move |req| {
            this.handle_subscribe(&req.topic);
            Ok(())
        });

        let this = Arc::clone(self);
        self.bus.subscribe::<ResyncEvent, _>("market:resync_requested", move |event| {
            this.handle_resync(event.clone());
            Ok(())
        });

        let this = Arc::clone(self);
        self.bus
            .subscribe::<KlineBootstrapRequest, _>("market:kline_bootstrap_requested", move |req| {
                let this = Arc::clone(&this);
                let req = req.clone();
                tokio::spawn(async move { this.run_kline_bootstrap(req).await });
                Ok(())
            });

        let ws = Arc::clone(&self.ws);
        self.bus.subscribe::<ConnectCommand, _>("market:connect", move |_| {
            let ws = Arc::clone(&ws);
            tokio::spawn(async move {
                if let Err(err) = ws.connect().await {
                    warn!(error = %err, "market:connect failed");
                }
            });
            Ok(())
        });

        let ws = Arc::clone(&self.ws);
        self.bus.subscribe::<DisconnectCommand, _>("market:disconnect", move |_| {
            let ws = Arc::clone(&ws);
            tokio::spawn(async move {
                let _ = ws.disconnect().await;
            });
            Ok(())
        });

        self.poller.spawn();
    }

    /// Topic routing table (§4.4): dispatches a logical subscribe topic to
    /// the WS client and/or lets the already-running poller cover it.
    fn handle_subscribe(&self, topic: &str) {
        if let Some(filter) = &self.topic_filter {
            if !filter(topic) {
                return;
            }
        }

        let Some((kind, rest)) = topic.split_once('.') else {
            warn!(topic, "malformed subscribe topic");
            return;
        };

        match kind {
            "tickers" => self.ws.subscribe_ticker(&Symbol::new(rest)),
            "publicTrade" | "trades" => self.ws.subscribe_trades(&Symbol::new(rest)),
            "orderbook" => match rest.split_once('.') {
                Some((depth_str, symbol)) => match depth_str.parse::<u32>() {
                    Ok(depth) => self.ws.subscribe_orderbook(&Symbol::new(symbol), depth),
                    Err(_) => warn!(topic, "unparseable orderbook depth"),
                },
                None => warn!(topic, "malformed orderbook topic"),
            },
            "kline" => match rest.split_once('.') {
                Some((interval_str, symbol)) => match Interval::parse(interval_str) {
                    Some(interval) => self.ws.subscribe_klines(&Symbol::new(symbol), interval),
                    None => warn!(topic, "unrecognized kline interval"),
                },
                None => warn!(topic, "malformed kline topic"),
            },
            "liquidations" => self.ws.subscribe_liquidations(&Symbol::new(rest)),
            "oi" | "funding" => {
                // Poller-only: the derivatives poller already covers every
                // configured symbol independent of WS subscriptions.
            }
            _ => warn!(topic, "unrecognized subscribe topic"),
        }
    }

    /// Resync throttle (§4.4): per-`(symbol, channel)` and
    /// per-`(symbol, channel, reason)` cooldowns plus an in-flight flag.
    fn handle_resync(self: &Arc<Self>, event: ResyncEvent) {
        let key = (event.symbol.clone(), event.channel.clone());
        let now = now_ms();

        let suppressed = {
            let mut state = self.resync_state.lock();
            let entry = state.entry(key).or_default();
            let channel_cold = now - entry.last_channel_ms >= self.config.resync_channel_cooldown.as_millis() as i64;
            let last_reason = entry.last_reason_ms.get(&event.reason).copied().unwrap_or(0);
            let reason_cold = now - last_reason >= self.config.resync_reason_cooldown.as_millis() as i64;

            if entry.inflight || !channel_cold || !reason_cold {
                true
            } else {
                entry.inflight = true;
                entry.last_channel_ms = now;
                entry.last_reason_ms.insert(event.reason, now);
                false
            }
        };

        if suppressed {
            warn!(
                symbol = event.symbol.as_str(),
                channel = %event.channel,
                reason = ?event.reason,
                "resync request throttled"
            );
            return;
        }

        match self.config.resync_strategy {
            ResyncStrategy::Ignore => {
                warn!(symbol = event.symbol.as_str(), channel = %event.channel, reason = ?event.reason, "resync requested (ignore strategy)");
                self.clear_resync_inflight(&event.symbol, &event.channel);
            }
            ResyncStrategy::Reconnect => {
                let this = Arc::clone(self);
                let symbol = event.symbol.clone();
                let channel = event.channel.clone();
                tokio::spawn(async move {
                    let _ = this.ws.disconnect().await;
                    if let Err(err) = this.ws.connect().await {
                        warn!(error = %err, "resync reconnect failed");
                    }
                    this.clear_resync_inflight(&symbol, &channel);
                });
            }
        }
    }

    fn clear_resync_inflight(&self, symbol: &Symbol, channel: &str) {
        if let Some(entry) = self.resync_state.lock().get_mut(&(symbol.clone(), channel.to_string())) {
            entry.inflight = false;
        }
    }

    /// Fetches up to `limit` historical klines ending at or before
    /// `since_ts + interval*limit` and emits them in ascending order.
    async fn run_kline_bootstrap(self: Arc<Self>, req: KlineBootstrapRequest) {
        let end_ts = req.since_ts + req.interval.as_millis() * req.limit as i64;
        let query = self
            .rest_adapter
            .kline_rest_query(req.symbol.as_str(), req.interval, req.limit, end_ts);
        let query_refs: Vec<(&str, &str)> = query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let result = self.rest.get_json(self.rest_adapter.kline_rest_path(), &query_refs).await;

        match result {
            Ok(resp) => {
                let klines = self.rest_adapter.parse_kline_rest_rows(req.symbol.as_str(), req.interval, &resp.data);
                if klines.is_empty() {
                    self.emit_bootstrap_failed(&req, "empty response".to_string());
                    return;
                }
                for kline in &klines {
                    let meta = create_meta(
                        Source::Market,
                        MetaOpts {
                            ts_event: Some(kline.end_ts),
                            ts_exchange: Some(kline.end_ts),
                            correlation_id: req.correlation_id.clone(),
                            ..Default::default()
                        },
                    );
                    self.bus.publish("market:kline", Envelope { meta, payload: kline.clone() });
                }
                self.bus.publish(
                    "market:kline_bootstrap_completed",
                    KlineBootstrapCompleted { symbol: req.symbol.clone(), interval: req.interval, count: klines.len() },
                );
            }
            Err(err) => self.emit_bootstrap_failed(&req, err.to_string()),
        }
    }

    fn emit_bootstrap_failed(&self, req: &KlineBootstrapRequest, reason: String) {
        self.bus.publish(
            "market:kline_bootstrap_failed",
            KlineBootstrapFailed { symbol: req.symbol.clone(), interval: req.interval, reason: reason.clone() },
        );

        let key = (req.symbol.clone(), req.interval.as_str());
        let now = now_ms();
        let mut warned = self.bootstrap_last_warn_ms.lock();
        let last = warned.get(&key).copied().unwrap_or(0);
        if now - last < self.config.bootstrap_warn_throttle.as_millis() as i64 {
            return;
        }
        warned.insert(key, now);
        drop(warned);
        warn!(symbol = req.symbol.as_str(), interval = req.interval.as_str(), reason, "kline bootstrap failed");
    }
}
