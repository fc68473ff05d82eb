//! Identifiers shared by every canonical entity.

use std::fmt;

use serde::Serialize;

/// The exchange operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Bybit,
    Binance,
    Okx,
}

impl Venue {
    pub fn as_str(self) -> &'static str {
        match self {
            Venue::Bybit => "bybit",
            Venue::Binance => "binance",
            Venue::Okx => "okx",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `spot | futures | unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Spot,
    Futures,
    #[default]
    Unknown,
}

impl MarketType {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Futures => "futures",
            MarketType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An exchange's instrument symbol, e.g. `BTCUSDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A stable identifier for one venue+market-type+channel group, e.g.
/// `bybit.public.linear.v5`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StreamId(pub String);

impl StreamId {
    pub fn new(venue: Venue, market_type: MarketType, channel_group: &str) -> Self {
        Self(format!("{venue}.public.{market_type}.{channel_group}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_format_matches_glossary_example() {
        let id = StreamId::new(Venue::Bybit, MarketType::Futures, "v5");
        assert_eq!(id.as_str(), "bybit.public.futures.v5");
    }

    #[test]
    fn venue_display_is_lowercase() {
        assert_eq!(Venue::Bybit.to_string(), "bybit");
        assert_eq!(Venue::Binance.to_string(), "binance");
        assert_eq!(Venue::Okx.to_string(), "okx");
    }

    #[test]
    fn market_type_default_is_unknown() {
        assert_eq!(MarketType::default(), MarketType::Unknown);
    }
}
