//! §8 scenario 5: repeated open-interest poll failures must back off, so a
//! later scheduled tick is skipped without ever reaching the network.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use backbone::bus::EventBus;
use backbone::exchange::venues::bybit::BybitAdapter;
use backbone::model::Symbol;
use backbone::rest::{DerivativesPoller, PollerConfig, RestClient};

use support::mock_http::AlwaysFailingServer;

#[tokio::test]
async fn failing_oi_polls_back_off_and_skip_a_scheduled_tick() {
    let server = AlwaysFailingServer::spawn("HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n").await;

    let bus = Arc::new(EventBus::new());
    let adapter = Arc::new(BybitAdapter::linear("wss://unused"));
    let client = RestClient::new(server.base_url()).expect("rest client");

    let config = PollerConfig {
        oi_interval: Duration::from_millis(120),
        funding_interval: Duration::from_secs(3600),
        base_backoff_ms: 400,
        warn_throttle: Duration::from_millis(50),
    };

    let poller = DerivativesPoller::new(client, Arc::clone(&bus), Arc::clone(&adapter), config, vec![Symbol::new("BTCUSDT")]);

    poller.spawn();
    // Ticks fire at ~120ms, ~240ms, ~360ms, ~480ms, ~600ms within this window.
    // Every failure schedules a backoff of ~400ms, so the tick immediately
    // following a failure must find the gate still closed and skip the
    // network call entirely.
    tokio::time::sleep(Duration::from_millis(650)).await;
    poller.stop();

    let requests = server.requests.load(Ordering::SeqCst);
    assert!(requests >= 1, "at least the first tick should have reached the network, got {requests}");
    assert!(requests < 5, "backoff should have skipped at least one of the five scheduled ticks, got {requests}");
}
