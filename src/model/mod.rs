//! Canonical market entities, keyed by `(venue, market_type, symbol)`.
//!
//! Events are created once at ingress (WS/REST parsers or bus publishers)
//! and never mutated after publish; owned state (last-seq, last-ts) lives in
//! the component that created it, not in these plain data types.

mod ids;
mod kline;
mod liquidation;
mod orderbook;
mod other;
mod ticker;
mod trade;

pub use ids::{MarketType, StreamId, Symbol, Venue};
pub use kline::{Interval, Kline};
pub use liquidation::Liquidation;
pub use orderbook::{OrderbookL2Delta, OrderbookL2Snapshot, OrderbookLevel};
pub use other::{FundingRate, OiUnit, OpenInterest};
pub use ticker::Ticker;
pub use trade::{Side, Trade};
