//! Per-venue wire adapters: how to ask a venue to subscribe, and how to turn
//! its frames into [`ExchangeFrame`](super::ExchangeFrame)s. [`WsClient`](super::ws_client::WsClient)
//! is generic over [`VenueAdapter`] so the connection lifecycle, ack
//! tracking, and sequencing logic is written exactly once.

pub mod bybit;

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use super::{Channel, ExchangeFrame};
use crate::model::{MarketType, StreamId, Symbol, Venue};

pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;
    fn market_type(&self) -> MarketType;
    fn ws_url(&self) -> &str;
    fn stream_id(&self) -> StreamId;

    /// The stable key this subscription is tracked under, e.g.
    /// `orderbook.50.BTCUSDT`. Used both as the wire subscribe argument (for
    /// venues that key args the same way) and as the [`SubscriptionTracker`](super::subscription::SubscriptionTracker) topic.
    fn subscribe_topic(&self, channel: &Channel, symbol: &Symbol) -> String;

    /// The outbound text frame asking the venue to subscribe.
    fn build_subscribe_frame(&self, channel: &Channel, symbol: &Symbol, request_id: &str) -> String;

    /// Some venues want an application-level ping frame rather than relying
    /// on the transport's WS ping; `None` means the transport ping suffices.
    fn build_ping_frame(&self) -> Option<String> {
        None
    }

    /// Reply to an inbound application-level ping (e.g. OKX's bare `"ping"`
    /// text frame). `None` means no reply is needed.
    fn build_pong_frame(&self) -> Option<String> {
        None
    }

    /// Parse one inbound text frame. Never propagates a parse error — bad
    /// JSON is common noise and is reported as [`ExchangeFrame::Malformed`].
    fn parse_frame(&self, text: &str) -> ExchangeFrame;
}

pub(crate) fn parse_value(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

pub(crate) fn decimal_field(value: &Value, key: &str) -> Option<Decimal> {
    value.get(key).and_then(parse_decimal)
}

pub(crate) fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

pub(crate) fn int_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn uint_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// REST (as opposed to WS-push) historical kline fetch, used by the market
/// gateway's kline bootstrap. Only implemented where a bootstrap REST
/// endpoint exists.
pub trait KlineRestAdapter {
    fn category(&self) -> &'static str;
    fn kline_rest_path(&self) -> &'static str;
    fn kline_rest_query(&self, symbol: &str, interval: crate::model::Interval, limit: u32, end_ts: i64) -> Vec<(String, String)>;
    /// Parses the endpoint's response `result` object into klines, in
    /// ascending `start_ts` order.
    fn parse_kline_rest_rows(&self, symbol: &str, interval: crate::model::Interval, result: &Value) -> Vec<crate::model::Kline>;
}

pub(crate) fn levels(value: &Value, key: &str) -> Vec<crate::model::OrderbookLevel> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    let price = parse_decimal(row.first()?)?;
                    let size = parse_decimal(row.get(1)?)?;
                    Some(crate::model::OrderbookLevel { price, size })
                })
                .collect()
        })
        .unwrap_or_default()
}
