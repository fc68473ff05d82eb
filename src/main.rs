use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};

use backbone::aggregate::{AggregateEvent, BucketedAggregateEvent, MismatchEvent, SignalAggregators};
use backbone::bus::{now_ms, Envelope, EventBus};
use backbone::config::Config;
use backbone::exchange::transport::TungsteniteTransport;
use backbone::exchange::venues::bybit::BybitAdapter;
use backbone::exchange::ws_client::WsClient;
use backbone::exchange::WsGatewayConfig;
use backbone::gateway::{GatewayConfig, MarketGateway, SubscribeRequest};
use backbone::journal::{JournalConfig, JournalWriter};
use backbone::model::{
    FundingRate, Kline, Liquidation, MarketType, OpenInterest, OrderbookL2Delta, OrderbookL2Snapshot, StreamId,
    Symbol, Ticker, Trade, Venue,
};
use backbone::observability::{EventTap, HealthReporter, HealthReporterConfig};
use backbone::orchestrator::Orchestrator;
use backbone::quality::GlobalDataQualityMonitor;
use backbone::readiness::{Block, ReadinessMonitor};
use backbone::rest::{DerivativesPoller, PollerConfig, RestClient};

const BYBIT_WS_LINEAR: &str = "wss://stream.bybit.com/v5/public/linear";
const BYBIT_WS_SPOT: &str = "wss://stream.bybit.com/v5/public/spot";
const BYBIT_REST_BASE: &str = "https://api.bybit.com";

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    config.init_logging();
    info!("backbone starting");

    let orchestrator = match run(config).await {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            error!(error = %err, "fatal error during startup");
            std::process::exit(1);
        }
    };

    signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    orchestrator.shutdown().await;

    info!("backbone stopped");
}

/// Wires every subsystem together and starts background tasks. Returns the
/// orchestrator so `main` can drive a clean shutdown once ctrl-c fires.
async fn run(config: Config) -> anyhow::Result<Arc<Orchestrator>> {
    let bus = Arc::new(EventBus::new());
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&bus)));

    let symbols: Vec<Symbol> = config.symbols.iter().map(Symbol::new).collect();
    let ws_url = if config.spot_enabled { BYBIT_WS_SPOT } else { BYBIT_WS_LINEAR };

    let ws_adapter = if config.spot_enabled { BybitAdapter::spot(ws_url) } else { BybitAdapter::linear(ws_url) };
    let ws = WsClient::new(ws_adapter, Arc::clone(&bus), WsGatewayConfig::default(), || TungsteniteTransport::new());

    let rest_adapter = Arc::new(if config.spot_enabled { BybitAdapter::spot(ws_url) } else { BybitAdapter::linear(ws_url) });
    let gateway_rest = RestClient::new(BYBIT_REST_BASE)?;
    let poller_rest = RestClient::new(BYBIT_REST_BASE)?;
    let poller = DerivativesPoller::new(poller_rest, Arc::clone(&bus), Arc::clone(&rest_adapter), PollerConfig::default(), symbols.clone());

    let gateway_config = GatewayConfig { venue: Venue::Bybit, market_type: config.target_market_type, ..GatewayConfig::default() };
    let gateway = MarketGateway::new(gateway_config, Arc::clone(&bus), Arc::clone(&ws), gateway_rest, Arc::clone(&rest_adapter), Arc::clone(&poller), None);
    gateway.install();

    let channels_per_symbol = if config.liquidations_enabled { 5 } else { 4 };
    let shard_plan = gateway.shard_plan(symbols.len(), channels_per_symbol);
    if shard_plan.num_shards > 1 {
        warn!(shards = shard_plan.num_shards, symbols_per_shard = shard_plan.symbols_per_shard, "symbol count exceeds a single connection's subscription ceiling; only the first shard is wired up");
    }

    let run_id = now_ms().to_string();
    let journal = JournalWriter::new(JournalConfig::new(config.journal_dir.clone(), run_id), Arc::clone(&bus));
    tokio::spawn(Arc::clone(&journal).run());
    wire_journal(&bus, &journal, config.target_market_type);

    let aggregators = Arc::new(SignalAggregators::new(
        Arc::clone(&bus),
        config.global_ttl_ms,
        config.cvd_bucket_ms,
        config.liq_bucket_ms,
        config.global_weights.clone(),
    ));
    aggregators.install(&bus);

    let quality = Arc::new(GlobalDataQualityMonitor::new(Arc::clone(&bus), Duration::from_secs(30)));
    wire_quality(&bus, &quality);

    let readiness = Arc::new(ReadinessMonitor::new(Arc::clone(&bus), config.readiness.clone(), config.expected_sources.clone()));
    wire_readiness(&bus, &readiness);
    {
        let readiness = Arc::clone(&readiness);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                readiness.sweep();
            }
        });
    }

    let tap = Arc::new(EventTap::new());
    wire_tap(&bus, &tap);

    let (health_shutdown_tx, health_shutdown_rx) = tokio::sync::watch::channel(false);
    let health_reporter = Arc::new(HealthReporter::new(
        HealthReporterConfig {
            log_dir: config.log_dir.clone(),
            interval: Duration::from_millis(config.health_snapshot_interval_ms),
            rotate_max_bytes: config.log_rotate_max_bytes,
            rotate_max_files: config.log_rotate_max_files,
        },
        Arc::clone(&tap),
        {
            let quality = Arc::clone(&quality);
            move || quality.snapshot(20).into_iter().map(|d| d.key).collect()
        },
    ));
    {
        let reporter = Arc::clone(&health_reporter);
        tokio::spawn(async move { reporter.run(health_shutdown_rx).await });
    }

    orchestrator.register_cleanup({
        let journal = Arc::clone(&journal);
        move || async move { journal.flush_once().await }
    });
    orchestrator.register_cleanup(move || async move {
        let _ = health_shutdown_tx.send(true);
    });
    orchestrator.register_cleanup({
        let poller = Arc::clone(&poller);
        move || async move { poller.stop() }
    });
    orchestrator.register_cleanup({
        let ws = Arc::clone(&ws);
        move || async move {
            let _ = ws.disconnect().await;
        }
    });

    orchestrator.start();

    if let Err(err) = ws.connect().await {
        warn!(error = %err, "initial connect failed, relying on reconnect loop");
    }
    for symbol in &symbols {
        bus.publish("market:subscribe", SubscribeRequest { topic: format!("tickers.{symbol}") });
        bus.publish("market:subscribe", SubscribeRequest { topic: format!("publicTrade.{symbol}") });
        bus.publish("market:subscribe", SubscribeRequest { topic: format!("orderbook.50.{symbol}") });
        bus.publish("market:subscribe", SubscribeRequest { topic: format!("kline.1m.{symbol}") });
        if config.liquidations_enabled {
            bus.publish("market:subscribe", SubscribeRequest { topic: format!("liquidations.{symbol}") });
        }
    }

    info!(symbols = symbols.len(), "backbone running");
    Ok(orchestrator)
}

fn topic_dir(topic: &str) -> String {
    topic.replace(':', "-")
}

/// Subscribes the journal to every canonical and `_raw` topic the gateway
/// and poller emit (§4.5: durably append every canonical and raw event).
fn wire_journal(bus: &Arc<EventBus>, journal: &Arc<JournalWriter>, market_type: MarketType) {
    let stream_id = StreamId::new(Venue::Bybit, market_type, "v5").as_str().to_string();

    macro_rules! journal_topic {
        ($topic:expr, $payload_ty:ty, $symbol_of:expr, $ts_of:expr) => {{
            let journal = Arc::clone(journal);
            let stream_id = stream_id.clone();
            let dir = topic_dir($topic);
            bus.subscribe::<Envelope<$payload_ty>, _>($topic, move |env: &Envelope<$payload_ty>| {
                let symbol = $symbol_of(&env.payload);
                let ts_exchange = $ts_of(&env.payload);
                let ts_ingest = env.meta.ts_ingest.unwrap_or(env.meta.ts);
                journal.append(&stream_id, symbol, $topic, &dir, None, ts_ingest, Some(ts_exchange), &env.payload);
                Ok(())
            });
        }};
    }

    journal_topic!("market:ticker", Ticker, |t: &Ticker| t.symbol.as_str(), |t: &Ticker| t.exchange_ts);
    journal_topic!("market:ticker_raw", Ticker, |t: &Ticker| t.symbol.as_str(), |t: &Ticker| t.exchange_ts);
    journal_topic!("market:trade", Trade, |t: &Trade| t.symbol.as_str(), |t: &Trade| t.trade_ts);
    journal_topic!("market:trade_raw", Trade, |t: &Trade| t.symbol.as_str(), |t: &Trade| t.trade_ts);
    journal_topic!("market:liquidation", Liquidation, |l: &Liquidation| l.symbol.as_str(), |l: &Liquidation| l.exchange_ts);
    journal_topic!("market:liquidation_raw", Liquidation, |l: &Liquidation| l.symbol.as_str(), |l: &Liquidation| l.exchange_ts);
    journal_topic!(
        "market:orderbook_l2_snapshot",
        OrderbookL2Snapshot,
        |s: &OrderbookL2Snapshot| s.symbol.as_str(),
        |s: &OrderbookL2Snapshot| s.exchange_ts
    );
    journal_topic!(
        "market:orderbook_l2_snapshot_raw",
        OrderbookL2Snapshot,
        |s: &OrderbookL2Snapshot| s.symbol.as_str(),
        |s: &OrderbookL2Snapshot| s.exchange_ts
    );
    journal_topic!(
        "market:orderbook_l2_delta",
        OrderbookL2Delta,
        |d: &OrderbookL2Delta| d.symbol.as_str(),
        |d: &OrderbookL2Delta| d.exchange_ts
    );
    journal_topic!(
        "market:orderbook_l2_delta_raw",
        OrderbookL2Delta,
        |d: &OrderbookL2Delta| d.symbol.as_str(),
        |d: &OrderbookL2Delta| d.exchange_ts
    );
    journal_topic!("market:open_interest", OpenInterest, |o: &OpenInterest| o.symbol.as_str(), |o: &OpenInterest| o.exchange_ts);
    journal_topic!("market:funding_rate", FundingRate, |f: &FundingRate| f.symbol.as_str(), |f: &FundingRate| f.exchange_ts);

    // Sequence/duplicate checks (§4.5) need fields the generic append() path
    // doesn't see; run them once per canonical (non-`_raw`) event.
    let journal_seq = Arc::clone(journal);
    bus.subscribe::<Envelope<OrderbookL2Delta>, _>("market:orderbook_l2_delta", move |env: &Envelope<OrderbookL2Delta>| {
        let d = &env.payload;
        journal_seq.check_sequence(&format!("orderbook:{}", d.symbol), d.update_id);
        Ok(())
    });
    let journal_dup = Arc::clone(journal);
    bus.subscribe::<Envelope<Trade>, _>("market:trade", move |env: &Envelope<Trade>| {
        let t = &env.payload;
        journal_dup.check_trade_duplicate(&format!("trade:{}", t.symbol), t.trade_ts, t.trade_id.as_deref());
        Ok(())
    });

    // Klines partition under a `{tf}` directory level per symbol/interval.
    let journal_kline = Arc::clone(journal);
    let stream_id_kline = stream_id.clone();
    bus.subscribe::<Envelope<Kline>, _>("market:kline", move |env: &Envelope<Kline>| {
        let k = &env.payload;
        let ts_ingest = env.meta.ts_ingest.unwrap_or(env.meta.ts);
        journal_kline.append(&stream_id_kline, k.symbol.as_str(), "market:kline", "market-kline", Some(k.interval.as_str()), ts_ingest, Some(k.end_ts), k);
        Ok(())
    });
}

fn wire_quality(bus: &Arc<EventBus>, quality: &Arc<GlobalDataQualityMonitor>) {
    macro_rules! track_arrival {
        ($topic:expr, $payload_ty:ty, $symbol_of:expr, $source:expr) => {{
            let quality = Arc::clone(quality);
            bus.subscribe::<Envelope<$payload_ty>, _>($topic, move |env: &Envelope<$payload_ty>| {
                quality.record_arrival($topic, $symbol_of(&env.payload), $source);
                Ok(())
            });
        }};
    }

    track_arrival!("market:ticker", Ticker, |t: &Ticker| t.symbol.as_str(), "bybit");
    track_arrival!("market:trade", Trade, |t: &Trade| t.symbol.as_str(), "bybit");
    track_arrival!("market:open_interest", OpenInterest, |o: &OpenInterest| o.symbol.as_str(), "bybit");
    track_arrival!("market:funding_rate", FundingRate, |f: &FundingRate| f.symbol.as_str(), "bybit");
    track_arrival!("market:orderbook_l2_snapshot", OrderbookL2Snapshot, |s: &OrderbookL2Snapshot| s.symbol.as_str(), "bybit");

    let sweeper = Arc::clone(quality);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            sweeper.sweep();
        }
    });
}

fn wire_readiness(bus: &Arc<EventBus>, readiness: &Arc<ReadinessMonitor>) {
    let r = Arc::clone(readiness);
    bus.subscribe::<Envelope<AggregateEvent>, _>("aggregate:canonical_price", move |env: &Envelope<AggregateEvent>| {
        let ts_ingest = env.meta.ts_ingest.unwrap_or(env.meta.ts);
        let ts_event = env.meta.ts_event.unwrap_or(env.meta.ts);
        r.record_block(&env.payload.symbol, MarketType::Futures, Block::Price, "aggregate", env.payload.confidence_score, ts_event, ts_ingest);
        Ok(())
    });

    let r = Arc::clone(readiness);
    bus.subscribe::<Envelope<AggregateEvent>, _>("aggregate:price_index", move |env: &Envelope<AggregateEvent>| {
        let ts_ingest = env.meta.ts_ingest.unwrap_or(env.meta.ts);
        let ts_event = env.meta.ts_event.unwrap_or(env.meta.ts);
        r.record_block(&env.payload.symbol, MarketType::Futures, Block::Price, "aggregate", env.payload.confidence_score, ts_event, ts_ingest);
        Ok(())
    });

    for topic in ["aggregate:cvd_futures", "aggregate:cvd_spot"] {
        let r = Arc::clone(readiness);
        bus.subscribe::<Envelope<BucketedAggregateEvent>, _>(topic, move |env: &Envelope<BucketedAggregateEvent>| {
            let ts = env.meta.ts_event.unwrap_or(env.meta.ts);
            r.record_block(&env.payload.symbol, MarketType::Futures, Block::Flow, "aggregate", 1.0, ts, ts);
            Ok(())
        });
    }

    let r = Arc::clone(readiness);
    bus.subscribe::<Envelope<BucketedAggregateEvent>, _>("aggregate:liquidity_l2", move |env: &Envelope<BucketedAggregateEvent>| {
        let ts = env.meta.ts_event.unwrap_or(env.meta.ts);
        r.record_block(&env.payload.symbol, MarketType::Futures, Block::Liquidity, "aggregate", 1.0, ts, ts);
        Ok(())
    });

    for topic in ["aggregate:open_interest", "aggregate:funding"] {
        let r = Arc::clone(readiness);
        bus.subscribe::<Envelope<AggregateEvent>, _>(topic, move |env: &Envelope<AggregateEvent>| {
            let ts_ingest = env.meta.ts_ingest.unwrap_or(env.meta.ts);
            let ts_event = env.meta.ts_event.unwrap_or(env.meta.ts);
            r.record_block(&env.payload.symbol, MarketType::Futures, Block::Derivatives, "aggregate", env.payload.confidence_score, ts_event, ts_ingest);
            Ok(())
        });
    }

    let r = Arc::clone(readiness);
    bus.subscribe::<MismatchEvent, _>("data:mismatch", move |event: &MismatchEvent| {
        r.record_mismatch(&event.symbol, MarketType::Futures);
        Ok(())
    });
}

fn wire_tap(bus: &Arc<EventBus>, tap: &Arc<EventTap>) {
    macro_rules! tap_topic {
        ($topic:expr, $payload_ty:ty) => {{
            let tap = Arc::clone(tap);
            bus.subscribe::<$payload_ty, _>($topic, move |_| {
                tap.record($topic);
                Ok(())
            });
        }};
    }

    tap_topic!("market:ticker", Envelope<Ticker>);
    tap_topic!("market:trade", Envelope<Trade>);
    tap_topic!("market:orderbook_l2_snapshot", Envelope<OrderbookL2Snapshot>);
    tap_topic!("market:kline", Envelope<Kline>);
    tap_topic!("market:liquidation", Envelope<Liquidation>);
    tap_topic!("market:open_interest", Envelope<OpenInterest>);
    tap_topic!("market:funding_rate", Envelope<FundingRate>);
}
