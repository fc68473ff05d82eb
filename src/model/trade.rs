use rust_decimal::Decimal;
use serde::Serialize;

use super::{MarketType, Symbol, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// A single executed trade.
///
/// Invariant: `trade_ts` is non-decreasing per `(symbol, stream)`; equality
/// is a duplicate candidate, disambiguated by `trade_id` when present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub venue: Venue,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub trade_id: Option<String>,
    /// Exchange-stamped trade time, milliseconds.
    pub trade_ts: i64,
}

impl Trade {
    /// Whether `self` and `other` should be treated as a duplicate of the
    /// same fill, per the journal quality contract (§4.5): identical
    /// `trade_ts`, and either both carry the same `trade_id` or neither
    /// carries one at all (in which case timestamp equality alone decides).
    pub fn is_duplicate_of(&self, other: &Trade) -> bool {
        if self.trade_ts != other.trade_ts {
            return false;
        }
        match (&self.trade_id, &other.trade_id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(ts: i64, id: Option<&str>) -> Trade {
        Trade {
            venue: Venue::Bybit,
            market_type: MarketType::Futures,
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            price: dec!(50000),
            size: dec!(0.1),
            trade_id: id.map(String::from),
            trade_ts: ts,
        }
    }

    #[test]
    fn same_ts_and_id_is_duplicate() {
        assert!(trade(1, Some("a")).is_duplicate_of(&trade(1, Some("a"))));
    }

    #[test]
    fn same_ts_different_id_is_not_duplicate() {
        assert!(!trade(1, Some("a")).is_duplicate_of(&trade(1, Some("b"))));
    }

    #[test]
    fn different_ts_is_not_duplicate() {
        assert!(!trade(1, Some("a")).is_duplicate_of(&trade(2, Some("a"))));
    }

    #[test]
    fn same_ts_no_ids_is_duplicate() {
        assert!(trade(1, None).is_duplicate_of(&trade(1, None)));
    }
}
