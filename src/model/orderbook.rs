use rust_decimal::Decimal;
use serde::Serialize;

use super::{MarketType, Symbol, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderbookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// A full order-book snapshot at a point in the update-id sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderbookL2Snapshot {
    pub venue: Venue,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    /// Monotonically increasing sequence number for this symbol/stream.
    pub update_id: u64,
    pub exchange_ts: i64,
}

/// An incremental order-book update.
///
/// Invariant: for a given `(symbol, stream)`, `update_id` is strictly
/// monotonic; only deltas with `update_id > snapshot.update_id` are accepted
/// after a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderbookL2Delta {
    pub venue: Venue,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    pub update_id: u64,
    pub exchange_ts: i64,
}
