use rust_decimal::Decimal;
use serde::Serialize;

use super::{MarketType, Symbol, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OiUnit {
    Base,
    Contracts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenInterest {
    pub venue: Venue,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub value: Decimal,
    pub unit: OiUnit,
    pub exchange_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundingRate {
    pub venue: Venue,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub rate: Decimal,
    pub next_funding_ts: i64,
    pub exchange_ts: i64,
}
