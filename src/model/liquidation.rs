use rust_decimal::Decimal;
use serde::Serialize;

use super::{MarketType, Side, Symbol, Venue};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Liquidation {
    pub venue: Venue,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub notional_usd: Decimal,
    pub exchange_ts: i64,
}
