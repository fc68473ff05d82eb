//! Cross-venue signal aggregators (§4.6): one per signal class, all built on
//! the common TTL/weighted-sum contract in [`core`] or the bucket contract
//! in [`bucketed`].

pub mod bucketed;
pub mod core;

pub use bucketed::{BucketedAggregateEvent, BucketedAggregator, BucketedAggregatorConfig};
pub use core::{AggregateEvent, Aggregator, AggregatorConfig, MismatchEvent};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;

use crate::bus::{Envelope, EventBus};
use crate::model::{Liquidation, OpenInterest, OrderbookL2Snapshot, Side, Ticker, Trade};

/// Every aggregator this crate ships, wired to its canonical input topic.
/// Constructed once; `install` subscribes every aggregator to the bus.
pub struct SignalAggregators {
    pub open_interest: Arc<Aggregator>,
    pub funding: Arc<Aggregator>,
    pub price_index: Arc<Aggregator>,
    pub canonical_price: Arc<Aggregator>,
    pub volume: Arc<Aggregator>,
    pub cvd_spot: Arc<BucketedAggregator>,
    pub cvd_futures: Arc<BucketedAggregator>,
    pub liquidations: Arc<BucketedAggregator>,
    pub liquidity_l2: Arc<BucketedAggregator>,
}

impl SignalAggregators {
    pub fn new(bus: Arc<EventBus>, global_ttl_ms: i64, cvd_bucket_ms: i64, liq_bucket_ms: i64, weights: HashMap<String, f64>) -> Self {
        let ttl = Duration::from_millis(global_ttl_ms as u64);
        let mk = |name: &'static str, topic: &'static str, expected: usize, threshold: f64| {
            Arc::new(Aggregator::new(
                AggregatorConfig { name, output_topic: topic, ttl, expected_source_count: expected, mismatch_threshold: threshold },
                Arc::clone(&bus),
                weights.clone(),
            ))
        };

        Self {
            open_interest: mk("open_interest", "aggregate:open_interest", 3, 0.02),
            funding: mk("funding", "aggregate:funding", 3, 0.0005),
            price_index: mk("price_index", "aggregate:price_index", 3, 0.001),
            canonical_price: mk("canonical_price", "aggregate:canonical_price", 3, 0.001),
            volume: mk("volume", "aggregate:volume", 3, 0.2),
            cvd_spot: Arc::new(BucketedAggregator::new(
                BucketedAggregatorConfig { output_topic: "aggregate:cvd_spot", bucket_ms: cvd_bucket_ms },
                Arc::clone(&bus),
            )),
            cvd_futures: Arc::new(BucketedAggregator::new(
                BucketedAggregatorConfig { output_topic: "aggregate:cvd_futures", bucket_ms: cvd_bucket_ms },
                Arc::clone(&bus),
            )),
            liquidations: Arc::new(BucketedAggregator::new(
                BucketedAggregatorConfig { output_topic: "aggregate:liquidations", bucket_ms: liq_bucket_ms },
                Arc::clone(&bus),
            )),
            liquidity_l2: Arc::new(BucketedAggregator::new(
                BucketedAggregatorConfig { output_topic: "aggregate:liquidity_l2", bucket_ms: liq_bucket_ms },
                bus,
            )),
        }
    }

    /// Subscribes every aggregator to its canonical input topic. Call once
    /// after construction.
    pub fn install(&self, bus: &Arc<EventBus>) {
        let oi = Arc::clone(&self.open_interest);
        bus.subscribe::<Envelope<OpenInterest>, _>("market:open_interest", move |env| {
            if let Some(v) = env.payload.value.to_f64() {
                oi.ingest(env.payload.symbol.as_str(), env.payload.venue.as_str(), v, env.payload.exchange_ts);
            }
            Ok(())
        });

        let funding = Arc::clone(&self.funding);
        bus.subscribe::<Envelope<crate::model::FundingRate>, _>("market:funding_rate", move |env| {
            if let Some(v) = env.payload.rate.to_f64() {
                funding.ingest(env.payload.symbol.as_str(), env.payload.venue.as_str(), v, env.payload.exchange_ts);
            }
            Ok(())
        });

        let price_index = Arc::clone(&self.price_index);
        let canonical_price = Arc::clone(&self.canonical_price);
        let volume = Arc::clone(&self.volume);
        bus.subscribe::<Envelope<Ticker>, _>("market:ticker", move |env| {
            let t: &Ticker = &env.payload;
            if let Some(index) = t.index_price.and_then(|v| v.to_f64()) {
                price_index.ingest(t.symbol.as_str(), t.venue.as_str(), index, t.exchange_ts);
            }
            if let Some(last) = t.last_price.to_f64() {
                canonical_price.ingest(t.symbol.as_str(), t.venue.as_str(), last, t.exchange_ts);
            }
            if let Some(vol) = t.volume_24h.and_then(|v| v.to_f64()) {
                volume.ingest(t.symbol.as_str(), t.venue.as_str(), vol, t.exchange_ts);
            }
            Ok(())
        });

        let cvd_spot = Arc::clone(&self.cvd_spot);
        let cvd_futures = Arc::clone(&self.cvd_futures);
        bus.subscribe::<Envelope<Trade>, _>("market:trade", move |env| {
            let t: &Trade = &env.payload;
            let Some(size) = t.size.to_f64() else { return Ok(()) };
            let signed = if t.side == Side::Buy { size } else { -size };
            let target = match t.market_type {
                crate::model::MarketType::Spot => &cvd_spot,
                _ => &cvd_futures,
            };
            target.ingest(t.symbol.as_str(), t.venue.as_str(), signed, t.trade_ts);
            Ok(())
        });

        let liquidations = Arc::clone(&self.liquidations);
        bus.subscribe::<Envelope<Liquidation>, _>("market:liquidation", move |env| {
            let l: &Liquidation = &env.payload;
            if let Some(notional) = l.notional_usd.to_f64() {
                liquidations.ingest(l.symbol.as_str(), l.venue.as_str(), notional, l.exchange_ts);
            }
            Ok(())
        });

        let liquidity = Arc::clone(&self.liquidity_l2);
        bus.subscribe::<Envelope<OrderbookL2Snapshot>, _>("market:orderbook_l2_snapshot", move |env| {
            let s: &OrderbookL2Snapshot = &env.payload;
            let depth: rust_decimal::Decimal = s.bids.iter().chain(s.asks.iter()).map(|l| l.size).sum();
            if let Some(depth) = depth.to_f64() {
                liquidity.ingest(s.symbol.as_str(), s.venue.as_str(), depth, s.exchange_ts);
            }
            Ok(())
        });
    }
}
