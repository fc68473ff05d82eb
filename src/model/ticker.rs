use rust_decimal::Decimal;
use serde::Serialize;

use super::{MarketType, Symbol, Venue};

/// 24h ticker snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticker {
    pub venue: Venue,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub index_price: Option<Decimal>,
    pub price_change_pct_24h: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub quote_volume_24h: Option<Decimal>,
    /// Exchange-stamped time, milliseconds.
    pub exchange_ts: i64,
}
