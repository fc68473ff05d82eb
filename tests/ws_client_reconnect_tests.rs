//! Cross-module §8 scenarios for the generic WS client that aren't covered
//! by its own white-box unit tests: ack-timeout-driven close, and replay of
//! every active subscription after a reconnect.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use backbone::bus::EventBus;
use backbone::exchange::transport::TransportMessage;
use backbone::exchange::venues::bybit::BybitAdapter;
use backbone::exchange::ws_client::WsClient;
use backbone::exchange::{ConnectionStatus, WsGatewayConfig};
use backbone::model::Symbol;

use support::scripted_transport::ScriptedTransport;

fn adapter() -> BybitAdapter {
    BybitAdapter::linear("wss://stream.bybit.com/v5/public/linear")
}

/// §8 scenario 3: a subscribe request that never acks must close the socket
/// exactly once (the ack_timer branch in `run_epoch`), not leave it hanging
/// or close it repeatedly.
#[tokio::test]
async fn unacked_subscribe_closes_socket_exactly_once() {
    let bus = Arc::new(EventBus::new());
    let config = WsGatewayConfig {
        ack_timeout: Duration::from_millis(10),
        ..WsGatewayConfig::default()
    };

    let shared_close_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let close_calls_for_factory = Arc::clone(&shared_close_calls);
    let client = WsClient::new(adapter(), Arc::clone(&bus), config, move || {
        let t = ScriptedTransport::new();
        // Route this transport's close counter into the shared counter so the
        // assertion below survives whichever connection instance answers.
        let shared = Arc::clone(&close_calls_for_factory);
        tokio::spawn({
            let local = Arc::clone(&t.close_calls);
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let n = local.load(Ordering::SeqCst);
                    if n > 0 {
                        shared.fetch_add(n, Ordering::SeqCst);
                        return;
                    }
                }
            }
        });
        t
    });

    client.subscribe_ticker(&Symbol::new("BTCUSDT"));
    client.connect().await.expect("connect");

    // The ack_timer in run_epoch only ticks once per second regardless of
    // `ack_timeout`, so this must wait past that tick to observe the close.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline && client.status() != ConnectionStatus::Idle {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(client.status(), ConnectionStatus::Idle, "socket should have closed after the unacked subscribe");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(shared_close_calls.load(Ordering::SeqCst), 1, "close() must be called exactly once");
}

/// §8 scenario 4: after a reconnect, every subscription active before the
/// drop is replayed with exactly one new subscribe frame, no duplicates and
/// no drops.
#[tokio::test]
async fn reconnect_replays_every_active_subscription_once() {
    let bus = Arc::new(EventBus::new());
    let sent_log = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
    let sent_for_factory = Arc::clone(&sent_log);

    let client = WsClient::new(adapter(), Arc::clone(&bus), WsGatewayConfig::default(), move || {
        let t = ScriptedTransport::new();
        let sink = Arc::clone(&sent_for_factory);
        let per_conn_sent = Arc::clone(&t.sent);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let mut drained = per_conn_sent.lock().await;
                if !drained.is_empty() {
                    sink.lock().await.append(&mut drained);
                }
            }
        });
        t
    });

    let btc = Symbol::new("BTCUSDT");
    let eth = Symbol::new("ETHUSDT");
    client.subscribe_ticker(&btc);
    client.subscribe_trades(&eth);

    client.connect().await.expect("first connect");
    tokio::time::sleep(Duration::from_millis(60)).await;

    client.disconnect().await.expect("disconnect");
    assert_eq!(client.status(), ConnectionStatus::Idle);

    client.connect().await.expect("reconnect");
    tokio::time::sleep(Duration::from_millis(60)).await;

    let sent = sent_log.lock().await;
    let btc_frames = sent.iter().filter(|f| f.contains("tickers.BTCUSDT")).count();
    let eth_frames = sent.iter().filter(|f| f.contains("publicTrade.ETHUSDT")).count();

    assert_eq!(btc_frames, 2, "one subscribe frame per connect cycle for the ticker topic");
    assert_eq!(eth_frames, 2, "one subscribe frame per connect cycle for the trades topic");
}

/// A transport that signals `Close` makes the client schedule a reconnect on
/// its own, without the caller driving `disconnect`/`connect` directly.
#[tokio::test]
async fn unsolicited_close_marks_client_idle_and_schedules_reconnect() {
    let bus = Arc::new(EventBus::new());
    let transport = ScriptedTransport::new();
    let transport_clone = transport.clone();

    let client = WsClient::new(adapter(), Arc::clone(&bus), WsGatewayConfig::default(), move || transport_clone.clone());

    client.connect().await.expect("connect");
    assert_eq!(client.status(), ConnectionStatus::Open);

    transport.push(TransportMessage::Close).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline && client.status() == ConnectionStatus::Open {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.status(), ConnectionStatus::Idle);
}
