//! §8 scenario 1: a ticker frame arriving over the wire must be parsed,
//! published on the bus, and durably journaled with `seq == 1` at the
//! documented partition path on its very first arrival.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use backbone::bus::{now_ms, Envelope, EventBus};
use backbone::exchange::transport::TransportMessage;
use backbone::exchange::venues::bybit::BybitAdapter;
use backbone::exchange::venues::VenueAdapter;
use backbone::exchange::ws_client::WsClient;
use backbone::exchange::WsGatewayConfig;
use backbone::journal::{JournalConfig, JournalWriter};
use backbone::model::Ticker;

use support::scripted_transport::ScriptedTransport;

#[tokio::test]
async fn ticker_happy_path_journals_at_seq_one() {
    let bus = Arc::new(EventBus::new());
    let adapter = BybitAdapter::linear("wss://stream.bybit.com/v5/public/linear");
    let stream_id = adapter.stream_id().as_str().to_string();

    let transport = ScriptedTransport::new();
    let transport_clone = transport.clone();
    let client = WsClient::new(adapter, Arc::clone(&bus), WsGatewayConfig::default(), move || transport_clone.clone());

    let dir = tempfile::tempdir().unwrap();
    let journal = JournalWriter::new(JournalConfig::new(dir.path(), "run-test"), Arc::clone(&bus));

    let observed_ts_ingest = Arc::new(std::sync::atomic::AtomicI64::new(-1));
    let journal_sub = Arc::clone(&journal);
    let stream_id_sub = stream_id.clone();
    let ts_cell = Arc::clone(&observed_ts_ingest);
    bus.subscribe::<Envelope<Ticker>, _>("market:ticker", move |env: &Envelope<Ticker>| {
        let ts_ingest = env.meta.ts_ingest.unwrap_or(env.meta.ts);
        ts_cell.store(ts_ingest, Ordering::SeqCst);
        journal_sub.append(&stream_id_sub, env.payload.symbol.as_str(), "market:ticker", "market-ticker", None, ts_ingest, Some(env.payload.exchange_ts), &env.payload);
        Ok(())
    });

    client.connect().await.expect("connect");

    let exchange_ts = now_ms();
    let frame = serde_json::json!({
        "topic": "tickers.BTCUSDT",
        "ts": exchange_ts,
        "type": "snapshot",
        "data": {
            "lastPrice": "65000.5",
            "markPrice": "65001.0",
            "indexPrice": "65000.0",
            "price24hPcnt": "0.01",
            "volume24h": "1234.5",
            "turnover24h": "80000000",
        }
    });
    transport.push(TransportMessage::Text(frame.to_string())).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline && observed_ts_ingest.load(Ordering::SeqCst) < 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let ts_ingest = observed_ts_ingest.load(Ordering::SeqCst);
    assert!(ts_ingest >= 0, "ticker should have been parsed and journaled");

    journal.flush_once().await;

    let path = journal.partition_path(&stream_id, "BTCUSDT", "market-ticker", None, ts_ingest);
    let content = tokio::fs::read_to_string(&path).await.expect("journal file should exist at the documented path");
    assert_eq!(content.lines().count(), 1);
    assert!(content.contains("\"seq\":1"));
    assert!(content.contains("\"symbol\":\"BTCUSDT\""));
    assert!(content.contains("65000.5"));
}
