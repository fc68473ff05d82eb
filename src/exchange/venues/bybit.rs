//! Bybit V5 public WS adapter (linear perpetuals by default).
//!
//! Wire conventions: `op=subscribe/ping/pong`, an ack shaped
//! `{success, ret_msg, conn_id, req_id, op}`, and data frames keyed by a
//! `topic` prefix (`tickers.`, `publicTrade.`, `orderbook.{depth}.`,
//! `kline.{interval}.`, `allLiquidation.`).

use serde_json::{json, Value};

use super::{decimal_field, int_field, levels, parse_decimal, parse_value, str_field, uint_field, KlineRestAdapter, VenueAdapter};
use crate::exchange::{Channel, ExchangeFrame};
use crate::model::{
    FundingRate, Interval, Kline, Liquidation, MarketType, OpenInterest, OrderbookL2Delta, OrderbookL2Snapshot,
    OiUnit, Side, StreamId, Symbol, Ticker, Trade, Venue,
};

pub struct BybitAdapter {
    market_type: MarketType,
    ws_url: String,
}

impl BybitAdapter {
    pub fn linear(ws_url: impl Into<String>) -> Self {
        Self {
            market_type: MarketType::Futures,
            ws_url: ws_url.into(),
        }
    }

    pub fn spot(ws_url: impl Into<String>) -> Self {
        Self {
            market_type: MarketType::Spot,
            ws_url: ws_url.into(),
        }
    }

    fn interval_code(interval: Interval) -> &'static str {
        match interval {
            Interval::OneMinute => "1",
            Interval::FiveMinutes => "5",
            Interval::FifteenMinutes => "15",
            Interval::OneHour => "60",
            Interval::FourHours => "240",
            Interval::OneDay => "D",
        }
    }

    fn wire_topic(&self, channel: &Channel, symbol: &Symbol) -> String {
        match channel {
            Channel::Ticker => format!("tickers.{symbol}"),
            Channel::Trades => format!("publicTrade.{symbol}"),
            Channel::Orderbook { depth } => format!("orderbook.{depth}.{symbol}"),
            Channel::Klines { interval } => format!("kline.{}.{symbol}", Self::interval_code(*interval)),
            Channel::Liquidations => format!("allLiquidation.{symbol}"),
        }
    }

    fn parse_data_frame(&self, topic: &str, value: &Value) -> ExchangeFrame {
        let ts = int_field(value, "ts").unwrap_or_default();
        let data = value.get("data");
        let kind = str_field(value, "type");

        if let Some(symbol) = topic.strip_prefix("tickers.") {
            return data
                .and_then(|d| self.parse_ticker(symbol, d, ts))
                .map(ExchangeFrame::Ticker)
                .unwrap_or(ExchangeFrame::Malformed);
        }
        if let Some(symbol) = topic.strip_prefix("publicTrade.") {
            return data
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
                .and_then(|row| self.parse_trade(symbol, row))
                .map(ExchangeFrame::Trade)
                .unwrap_or(ExchangeFrame::Malformed);
        }
        if topic.starts_with("orderbook.") {
            let symbol = topic.rsplit('.').next().unwrap_or_default();
            return match (kind, data) {
                (Some("snapshot"), Some(d)) => self
                    .parse_orderbook_snapshot(symbol, d, ts)
                    .map(ExchangeFrame::OrderbookSnapshot)
                    .unwrap_or(ExchangeFrame::Malformed),
                (Some("delta"), Some(d)) => self
                    .parse_orderbook_delta(symbol, d, ts)
                    .map(ExchangeFrame::OrderbookDelta)
                    .unwrap_or(ExchangeFrame::Malformed),
                _ => ExchangeFrame::Malformed,
            };
        }
        if topic.starts_with("kline.") {
            let symbol = topic.rsplit('.').next().unwrap_or_default();
            let interval = topic.split('.').nth(1).unwrap_or_default();
            return data
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
                .and_then(|row| self.parse_kline(symbol, interval, row))
                .map(ExchangeFrame::Kline)
                .unwrap_or(ExchangeFrame::Malformed);
        }
        if let Some(symbol) = topic.strip_prefix("allLiquidation.") {
            return data
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
                .and_then(|row| self.parse_liquidation(symbol, row))
                .map(ExchangeFrame::Liquidation)
                .unwrap_or(ExchangeFrame::Malformed);
        }

        ExchangeFrame::Unknown
    }

    fn parse_ticker(&self, symbol: &str, d: &Value, ts: i64) -> Option<Ticker> {
        Some(Ticker {
            venue: Venue::Bybit,
            market_type: self.market_type,
            symbol: Symbol::new(symbol),
            last_price: decimal_field(d, "lastPrice")?,
            mark_price: decimal_field(d, "markPrice"),
            index_price: decimal_field(d, "indexPrice"),
            price_change_pct_24h: decimal_field(d, "price24hPcnt"),
            volume_24h: decimal_field(d, "volume24h"),
            quote_volume_24h: decimal_field(d, "turnover24h"),
            exchange_ts: ts,
        })
    }

    fn parse_trade(&self, symbol: &str, row: &Value) -> Option<Trade> {
        let side = match str_field(row, "S")? {
            "Buy" => Side::Buy,
            "Sell" => Side::Sell,
            _ => return None,
        };
        Some(Trade {
            venue: Venue::Bybit,
            market_type: self.market_type,
            symbol: Symbol::new(symbol),
            side,
            price: decimal_field(row, "p")?,
            size: decimal_field(row, "v")?,
            trade_id: str_field(row, "i").map(String::from),
            trade_ts: int_field(row, "T")?,
        })
    }

    fn parse_orderbook_snapshot(&self, symbol: &str, d: &Value, ts: i64) -> Option<OrderbookL2Snapshot> {
        Some(OrderbookL2Snapshot {
            venue: Venue::Bybit,
            market_type: self.market_type,
            symbol: Symbol::new(symbol),
            bids: levels(d, "b"),
            asks: levels(d, "a"),
            update_id: uint_field(d, "u")?,
            exchange_ts: ts,
        })
    }

    fn parse_orderbook_delta(&self, symbol: &str, d: &Value, ts: i64) -> Option<OrderbookL2Delta> {
        Some(OrderbookL2Delta {
            venue: Venue::Bybit,
            market_type: self.market_type,
            symbol: Symbol::new(symbol),
            bids: levels(d, "b"),
            asks: levels(d, "a"),
            update_id: uint_field(d, "u")?,
            exchange_ts: ts,
        })
    }

    fn parse_kline(&self, symbol: &str, interval_code: &str, row: &Value) -> Option<Kline> {
        let interval = match interval_code {
            "1" => Interval::OneMinute,
            "5" => Interval::FiveMinutes,
            "15" => Interval::FifteenMinutes,
            "60" => Interval::OneHour,
            "240" => Interval::FourHours,
            "D" => Interval::OneDay,
            _ => return None,
        };
        Some(Kline {
            venue: Venue::Bybit,
            market_type: self.market_type,
            symbol: Symbol::new(symbol),
            interval,
            start_ts: int_field(row, "start")?,
            end_ts: int_field(row, "end")?,
            open: decimal_field(row, "open")?,
            high: decimal_field(row, "high")?,
            low: decimal_field(row, "low")?,
            close: decimal_field(row, "close")?,
            volume: decimal_field(row, "volume")?,
            confirmed: row.get("confirm").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    fn parse_liquidation(&self, symbol: &str, row: &Value) -> Option<Liquidation> {
        let side = match str_field(row, "side")? {
            "Buy" => Side::Buy,
            "Sell" => Side::Sell,
            _ => return None,
        };
        let price = decimal_field(row, "price")?;
        let size = decimal_field(row, "size")?;
        Some(Liquidation {
            venue: Venue::Bybit,
            market_type: self.market_type,
            symbol: Symbol::new(symbol),
            side,
            price,
            size,
            notional_usd: price * size,
            exchange_ts: int_field(row, "updatedTime")?,
        })
    }

    /// `GET /v5/market/open-interest` response-row parsing, shared with the
    /// REST poller.
    pub fn parse_open_interest_row(&self, symbol: &str, row: &Value) -> Option<OpenInterest> {
        Some(OpenInterest {
            venue: Venue::Bybit,
            market_type: self.market_type,
            symbol: Symbol::new(symbol),
            value: decimal_field(row, "openInterest")?,
            unit: OiUnit::Base,
            exchange_ts: int_field(row, "timestamp")?,
        })
    }

    /// `GET /v5/market/funding/history` response-row parsing.
    pub fn parse_funding_row(&self, symbol: &str, row: &Value) -> Option<FundingRate> {
        let exchange_ts = int_field(row, "fundingRateTimestamp")?;
        Some(FundingRate {
            venue: Venue::Bybit,
            market_type: self.market_type,
            symbol: Symbol::new(symbol),
            rate: decimal_field(row, "fundingRate")?,
            next_funding_ts: exchange_ts,
            exchange_ts,
        })
    }

    pub fn category(&self) -> &'static str {
        match self.market_type {
            MarketType::Spot => "spot",
            _ => "linear",
        }
    }
}

impl VenueAdapter for BybitAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn market_type(&self) -> MarketType {
        self.market_type
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn stream_id(&self) -> StreamId {
        StreamId::new(Venue::Bybit, self.market_type, "v5")
    }

    fn subscribe_topic(&self, channel: &Channel, symbol: &Symbol) -> String {
        self.wire_topic(channel, symbol)
    }

    fn build_subscribe_frame(&self, channel: &Channel, symbol: &Symbol, request_id: &str) -> String {
        json!({
            "op": "subscribe",
            "req_id": request_id,
            "args": [self.wire_topic(channel, symbol)],
        })
        .to_string()
    }

    fn build_ping_frame(&self) -> Option<String> {
        Some(json!({"op": "ping"}).to_string())
    }

    fn parse_frame(&self, text: &str) -> ExchangeFrame {
        let value = match parse_value(text) {
            Some(v) => v,
            None => return ExchangeFrame::Malformed,
        };

        if let Some(op) = str_field(&value, "op") {
            match op {
                "ping" => return ExchangeFrame::Ping,
                "pong" => return ExchangeFrame::Pong,
                "subscribe" => {
                    return ExchangeFrame::Ack {
                        success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
                        req_id: str_field(&value, "req_id").map(String::from),
                        ret_msg: str_field(&value, "ret_msg").map(String::from),
                    }
                }
                _ => return ExchangeFrame::Unknown,
            }
        }

        if value.get("success").is_some() && value.get("op").is_none() && value.get("topic").is_none() {
            return ExchangeFrame::Ack {
                success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
                req_id: str_field(&value, "req_id").map(String::from),
                ret_msg: str_field(&value, "ret_msg").map(String::from),
            };
        }

        match str_field(&value, "topic") {
            Some(topic) => self.parse_data_frame(topic, &value),
            None => ExchangeFrame::Unknown,
        }
    }
}

impl KlineRestAdapter for BybitAdapter {
    fn category(&self) -> &'static str {
        BybitAdapter::category(self)
    }

    fn kline_rest_path(&self) -> &'static str {
        "/v5/market/kline"
    }

    fn kline_rest_query(&self, symbol: &str, interval: Interval, limit: u32, end_ts: i64) -> Vec<(String, String)> {
        vec![
            ("category".to_string(), self.category().to_string()),
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), Self::interval_code(interval).to_string()),
            ("limit".to_string(), limit.to_string()),
            ("end".to_string(), end_ts.to_string()),
        ]
    }

    fn parse_kline_rest_rows(&self, symbol: &str, interval: Interval, result: &Value) -> Vec<Kline> {
        let rows = result.get("list").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut klines: Vec<Kline> = rows
            .iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                let start_ts: i64 = row.first()?.as_str()?.parse().ok()?;
                Some(Kline {
                    venue: Venue::Bybit,
                    market_type: self.market_type,
                    symbol: Symbol::new(symbol),
                    interval,
                    start_ts,
                    end_ts: start_ts + interval.as_millis(),
                    open: parse_decimal(row.get(1)?)?,
                    high: parse_decimal(row.get(2)?)?,
                    low: parse_decimal(row.get(3)?)?,
                    close: parse_decimal(row.get(4)?)?,
                    volume: parse_decimal(row.get(5)?)?,
                    confirmed: true,
                })
            })
            .collect();
        // Bybit returns rows newest-first; the gateway must emit ascending.
        klines.sort_by_key(|k| k.start_ts);
        klines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> BybitAdapter {
        BybitAdapter::linear("wss://stream.bybit.com/v5/public/linear")
    }

    #[test]
    fn stream_id_is_bybit_futures_v5() {
        assert_eq!(adapter().stream_id().as_str(), "bybit.public.futures.v5");
    }

    #[test]
    fn parses_ping_and_subscribe_ack() {
        let a = adapter();
        assert!(matches!(a.parse_frame(r#"{"op":"ping"}"#), ExchangeFrame::Ping));
        let ack = a.parse_frame(r#"{"success":true,"ret_msg":"","op":"subscribe","req_id":"r1"}"#);
        assert!(matches!(ack, ExchangeFrame::Ack { success: true, .. }));
    }

    #[test]
    fn parses_ticker_frame_with_string_price() {
        let a = adapter();
        let text = r#"{"topic":"tickers.BTCUSDT","ts":1700000000000,"type":"snapshot","data":{"lastPrice":"50000.0"}}"#;
        match a.parse_frame(text) {
            ExchangeFrame::Ticker(t) => {
                assert_eq!(t.symbol.as_str(), "BTCUSDT");
                assert_eq!(t.exchange_ts, 1_700_000_000_000);
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn parses_orderbook_snapshot_and_delta() {
        let a = adapter();
        let snap = a.parse_frame(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":1,"data":{"b":[["1","2"]],"a":[["3","4"]],"u":10}}"#,
        );
        assert!(matches!(snap, ExchangeFrame::OrderbookSnapshot(s) if s.update_id == 10));

        let delta = a.parse_frame(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":2,"data":{"b":[],"a":[],"u":11}}"#,
        );
        assert!(matches!(delta, ExchangeFrame::OrderbookDelta(d) if d.update_id == 11));
    }

    #[test]
    fn malformed_json_is_reported_not_panicked() {
        let a = adapter();
        assert!(matches!(a.parse_frame("not json"), ExchangeFrame::Malformed));
    }

    #[test]
    fn kline_rest_rows_are_sorted_ascending_by_start_ts() {
        let a = adapter();
        let result = serde_json::json!({"list": [
            ["200", "1", "2", "0.5", "1.5", "10"],
            ["100", "1", "2", "0.5", "1.5", "10"],
        ]});
        let klines = a.parse_kline_rest_rows("BTCUSDT", Interval::OneMinute, &result);
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].start_ts, 100);
        assert_eq!(klines[1].start_ts, 200);
        assert!(klines[0].confirmed);
        assert_eq!(klines[0].end_ts, 100 + Interval::OneMinute.as_millis());
    }

    #[test]
    fn subscribe_frame_contains_wire_topic_and_req_id() {
        let a = adapter();
        let frame = a.build_subscribe_frame(&Channel::Ticker, &Symbol::new("BTCUSDT"), "req-1");
        assert!(frame.contains("tickers.BTCUSDT"));
        assert!(frame.contains("req-1"));
    }
}
