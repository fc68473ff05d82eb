use rust_decimal::Decimal;
use serde::Serialize;

use super::{MarketType, Symbol, Venue};

/// Candle interval, named the way venues spell them on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl Interval {
    pub fn as_millis(self) -> i64 {
        match self {
            Interval::OneMinute => 60_000,
            Interval::FiveMinutes => 5 * 60_000,
            Interval::FifteenMinutes => 15 * 60_000,
            Interval::OneHour => 60 * 60_000,
            Interval::FourHours => 4 * 60 * 60_000,
            Interval::OneDay => 24 * 60 * 60_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::OneMinute),
            "5m" => Some(Interval::FiveMinutes),
            "15m" => Some(Interval::FifteenMinutes),
            "1h" => Some(Interval::OneHour),
            "4h" => Some(Interval::FourHours),
            "1d" => Some(Interval::OneDay),
            _ => None,
        }
    }
}

/// A single candle. Invariant: `start_ts + interval.as_millis() == end_ts`.
/// Only confirmed klines are emitted as canonical `market:kline` events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kline {
    pub venue: Venue,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub interval: Interval,
    pub start_ts: i64,
    pub end_ts: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub confirmed: bool,
}

impl Kline {
    pub fn is_well_formed(&self) -> bool {
        self.start_ts + self.interval.as_millis() == self.end_ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kline(start: i64, end: i64) -> Kline {
        Kline {
            venue: super::super::Venue::Bybit,
            market_type: super::super::MarketType::Futures,
            symbol: super::super::Symbol::new("BTCUSDT"),
            interval: Interval::OneMinute,
            start_ts: start,
            end_ts: end,
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: dec!(1),
            confirmed: true,
        }
    }

    #[test]
    fn well_formed_when_end_matches_interval() {
        assert!(kline(0, 60_000).is_well_formed());
    }

    #[test]
    fn not_well_formed_when_end_mismatches() {
        assert!(!kline(0, 59_000).is_well_formed());
    }
}
