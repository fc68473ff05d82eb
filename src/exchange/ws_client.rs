//! The generic WS client: one instance per venue connection, parameterized
//! over the transport and the venue adapter so the lifecycle, heartbeat,
//! reconnect, and sequencing logic lives exactly once (§4.2).
//!
//! The transport is owned exclusively by the task spawned from
//! [`WsClient::connect`] — there is no shared-mutex-around-the-socket
//! pattern here. Callers interact through a small outbound channel and a set
//! of atomics/locks guarding only the client's own bookkeeping, mirroring
//! the teacher's single-owner-per-stream discipline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backoff::reconnect_delay_ms;
use super::orderbook_seq::{DeltaOutcome, SequenceTracker};
use super::subscription::SubscriptionTracker;
use super::transport::{TransportMessage, WsTransport};
use super::venues::VenueAdapter;
use super::{Channel, ConnectionEvent, ConnectionStatus, ErrorEvent, ExchangeFrame, ResyncEvent, WsGatewayConfig};
use crate::bus::{create_meta, now_ms, Envelope, EventBus, MetaOpts, Source};
use crate::error::{Error, Result};
use crate::model::{Kline, Liquidation, OrderbookL2Delta, OrderbookL2Snapshot, Symbol, Ticker, Trade};

enum OutboundMsg {
    Text(String),
    Shutdown(oneshot::Sender<()>),
}

pub struct WsClient<T, A>
where
    T: WsTransport + 'static,
    A: VenueAdapter + 'static,
{
    adapter: A,
    bus: Arc<EventBus>,
    config: WsGatewayConfig,
    transport_factory: Box<dyn Fn() -> T + Send + Sync>,

    status: RwLock<ConnectionStatus>,
    epoch: AtomicU64,
    auto_reconnect: AtomicBool,
    reconnect_attempts: AtomicU32,
    request_counter: AtomicU64,
    last_activity_ms: AtomicI64,

    connect_gate: tokio::sync::Mutex<()>,
    outbound: Mutex<Option<mpsc::UnboundedSender<OutboundMsg>>>,
    subscriptions: Mutex<SubscriptionTracker>,
    known: Mutex<HashMap<String, (Channel, Symbol)>>,
    seq_trackers: Mutex<HashMap<Symbol, SequenceTracker>>,
}

impl<T, A> WsClient<T, A>
where
    T: WsTransport + 'static,
    A: VenueAdapter + 'static,
{
    pub fn new(
        adapter: A,
        bus: Arc<EventBus>,
        config: WsGatewayConfig,
        transport_factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            bus,
            config,
            transport_factory: Box::new(transport_factory),
            status: RwLock::new(ConnectionStatus::Idle),
            epoch: AtomicU64::new(0),
            auto_reconnect: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            request_counter: AtomicU64::new(1),
            last_activity_ms: AtomicI64::new(now_ms()),
            connect_gate: tokio::sync::Mutex::new(()),
            outbound: Mutex::new(None),
            subscriptions: Mutex::new(SubscriptionTracker::new()),
            known: Mutex::new(HashMap::new()),
            seq_trackers: Mutex::new(HashMap::new()),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    pub fn is_alive(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    fn next_request_id(&self) -> String {
        format!("req-{}", self.request_counter.fetch_add(1, Ordering::SeqCst))
    }

    fn touch_activity(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    fn watchdog_expired(&self) -> bool {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        now_ms() - last > self.config.watchdog_timeout.as_millis() as i64
    }

    /// Idempotent: concurrent callers serialize on `connect_gate`; whichever
    /// arrives after the first sees `Open` and returns immediately, so at
    /// most one transport is ever created per successful connect cycle.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let _gate = self.connect_gate.lock().await;
        if self.status() == ConnectionStatus::Open {
            return Ok(());
        }

        *self.status.write() = ConnectionStatus::Connecting;
        let mut transport = (self.transport_factory)();
        let url = self.adapter.ws_url().to_string();

        let connected = tokio::time::timeout(self.config.connect_timeout, transport.connect(&url)).await;
        let connected = match connected {
            Ok(inner) => inner,
            Err(_) => {
                *self.status.write() = ConnectionStatus::Idle;
                self.publish_error("connect timed out");
                self.schedule_reconnect();
                return Err(Error::Timeout("ws connect".into()));
            }
        };
        if let Err(err) = connected {
            *self.status.write() = ConnectionStatus::Idle;
            self.publish_error(err.to_string());
            self.schedule_reconnect();
            return Err(err);
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = Some(tx);
        *self.status.write() = ConnectionStatus::Open;
        self.auto_reconnect.store(true, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.touch_activity();

        self.replay_subscriptions();
        self.publish_connected();

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_epoch(epoch, transport, rx).await });

        Ok(())
    }

    /// Attempt clean close; if the peer doesn't confirm within
    /// `close_timeout`, the socket is force-dropped regardless.
    pub async fn disconnect(self: &Arc<Self>) -> Result<()> {
        let _gate = self.connect_gate.lock().await;
        if self.status() == ConnectionStatus::Idle {
            return Ok(());
        }

        self.auto_reconnect.store(false, Ordering::SeqCst);
        *self.status.write() = ConnectionStatus::Closing;

        let tx = self.outbound.lock().take();
        if let Some(tx) = tx {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(OutboundMsg::Shutdown(done_tx)).is_ok() {
                let _ = tokio::time::timeout(self.config.close_timeout, done_rx).await;
            }
        }

        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.status.write() = ConnectionStatus::Idle;
        self.publish_disconnected();
        Ok(())
    }

    pub fn subscribe_ticker(&self, symbol: &Symbol) {
        self.subscribe(Channel::Ticker, symbol.clone());
    }

    pub fn subscribe_trades(&self, symbol: &Symbol) {
        self.subscribe(Channel::Trades, symbol.clone());
    }

    pub fn subscribe_orderbook(&self, symbol: &Symbol, depth: u32) {
        self.subscribe(Channel::Orderbook { depth }, symbol.clone());
    }

    pub fn subscribe_klines(&self, symbol: &Symbol, interval: crate::model::Interval) {
        self.subscribe(Channel::Klines { interval }, symbol.clone());
    }

    pub fn subscribe_liquidations(&self, symbol: &Symbol) {
        self.subscribe(Channel::Liquidations, symbol.clone());
    }

    fn subscribe(&self, channel: Channel, symbol: Symbol) {
        let topic = super::tracker_topic(&channel, &symbol);
        self.known.lock().insert(topic.clone(), (channel.clone(), symbol.clone()));
        self.send_subscribe(&topic, &channel, &symbol);
    }

    fn send_subscribe(&self, topic: &str, channel: &Channel, symbol: &Symbol) {
        let request_id = self.next_request_id();
        let frame = self.adapter.build_subscribe_frame(channel, symbol, &request_id);
        self.subscriptions.lock().record_pending(topic, request_id);
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(OutboundMsg::Text(frame));
        }
    }

    /// Replays every previously known subscription with a fresh request id
    /// (§8 scenario 4: exactly one new subscribe frame per active topic).
    fn replay_subscriptions(&self) {
        let known = self.known.lock().clone();
        for (topic, (channel, symbol)) in known.iter() {
            self.send_subscribe(topic, channel, symbol);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.auto_reconnect.load(Ordering::SeqCst) {
            return;
        }
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = reconnect_delay_ms(attempt);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if let Err(err) = this.connect().await {
                warn!(venue = %this.adapter.venue(), error = %err, "reconnect attempt failed");
            }
        });
    }

    fn on_transport_closed(self: &Arc<Self>, epoch: u64) {
        // A fresher connection has already superseded this one; nothing to do.
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        *self.outbound.lock() = None;
        *self.status.write() = ConnectionStatus::Idle;
        self.publish_disconnected();
        self.schedule_reconnect();
    }

    async fn run_epoch(self: Arc<Self>, epoch: u64, mut transport: T, mut outbound_rx: mpsc::UnboundedReceiver<OutboundMsg>) {
        let mut ping_timer = tokio::time::interval(self.config.ping_interval);
        let mut watchdog_timer = tokio::time::interval(Duration::from_secs(5));
        let mut ack_timer = tokio::time::interval(Duration::from_secs(1));

        loop {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                let _ = transport.close().await;
                return;
            }

            tokio::select! {
                msg = transport.recv() => {
                    match msg {
                        Some(TransportMessage::Text(text)) => {
                            self.touch_activity();
                            self.handle_text(&mut transport, &text).await;
                        }
                        Some(TransportMessage::Ping) => {
                            self.touch_activity();
                            let _ = transport.send_ping().await;
                        }
                        Some(TransportMessage::Pong) => {
                            self.touch_activity();
                        }
                        Some(TransportMessage::Close) | None => {
                            self.on_transport_closed(epoch);
                            return;
                        }
                    }
                }
                Some(out) = outbound_rx.recv() => {
                    match out {
                        OutboundMsg::Text(text) => {
                            let _ = transport.send_text(text).await;
                        }
                        OutboundMsg::Shutdown(done) => {
                            let _ = tokio::time::timeout(self.config.close_timeout, transport.close()).await;
                            let _ = done.send(());
                            return;
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    // Outbound pings are silent: a failure here is not logged.
                    if let Some(frame) = self.adapter.build_ping_frame() {
                        let _ = transport.send_text(frame).await;
                    } else {
                        let _ = transport.send_ping().await;
                    }
                }
                _ = watchdog_timer.tick() => {
                    if self.watchdog_expired() {
                        debug!(venue = %self.adapter.venue(), "watchdog expired, closing socket");
                        self.publish_error("watchdog expired: no activity on socket");
                        let _ = transport.close().await;
                        self.on_transport_closed(epoch);
                        return;
                    }
                }
                _ = ack_timer.tick() => {
                    let timed_out = self.subscriptions.lock().timed_out(self.config.ack_timeout);
                    if !timed_out.is_empty() {
                        warn!(venue = %self.adapter.venue(), topics = ?timed_out, "subscribe ack timed out, closing socket");
                        self.publish_error(format!("subscribe ack timed out for topics: {timed_out:?}"));
                        let _ = transport.close().await;
                        self.on_transport_closed(epoch);
                        return;
                    }
                }
            }
        }
    }

    async fn handle_text(self: &Arc<Self>, transport: &mut T, text: &str) {
        match self.adapter.parse_frame(text) {
            ExchangeFrame::Ping => {
                if let Some(pong) = self.adapter.build_pong_frame() {
                    let _ = transport.send_text(pong).await;
                }
            }
            ExchangeFrame::Pong => {}
            ExchangeFrame::Ack { success, req_id, ret_msg } => {
                if let Some(id) = req_id {
                    if success {
                        self.subscriptions.lock().ack(&id);
                    } else {
                        warn!(venue = %self.adapter.venue(), req_id = %id, ret_msg = ?ret_msg, "subscribe ack reported failure");
                    }
                }
            }
            ExchangeFrame::Ticker(t) => self.publish_ticker(t),
            ExchangeFrame::Trade(t) => self.publish_trade(t),
            ExchangeFrame::OrderbookSnapshot(s) => self.handle_orderbook_snapshot(s),
            ExchangeFrame::OrderbookDelta(d) => self.handle_orderbook_delta(d),
            ExchangeFrame::Kline(k) => self.publish_kline(k),
            ExchangeFrame::Liquidation(l) => self.publish_liquidation(l),
            ExchangeFrame::Unknown => {}
            // Malformed JSON is common noise on public feeds; dropped silently.
            ExchangeFrame::Malformed => {}
        }
    }

    fn meta_for(&self, ts_event: Option<i64>) -> crate::bus::EventMeta {
        create_meta(
            Source::Market,
            MetaOpts {
                ts_event,
                ts_exchange: ts_event,
                stream_id: Some(self.adapter.stream_id().as_str().to_string()),
                ..Default::default()
            },
        )
    }

    fn publish_pair<P: Clone + Send + Sync + 'static>(&self, topic: &str, payload: P, ts_event: Option<i64>) {
        let meta = self.meta_for(ts_event);
        self.bus.publish(topic, Envelope { meta: meta.clone(), payload: payload.clone() });
        self.bus.publish(&format!("{topic}_raw"), Envelope { meta, payload });
    }

    fn publish_ticker(&self, t: Ticker) {
        let ts = t.exchange_ts;
        self.publish_pair("market:ticker", t, Some(ts));
    }

    fn publish_trade(&self, t: Trade) {
        let ts = t.trade_ts;
        self.publish_pair("market:trade", t, Some(ts));
    }

    fn publish_kline(&self, k: Kline) {
        if !k.confirmed {
            return;
        }
        let ts = k.end_ts;
        self.publish_pair("market:kline", k, Some(ts));
    }

    fn publish_liquidation(&self, l: Liquidation) {
        let ts = l.exchange_ts;
        self.publish_pair("market:liquidation", l, Some(ts));
    }

    fn handle_orderbook_snapshot(&self, snap: OrderbookL2Snapshot) {
        self.seq_trackers
            .lock()
            .entry(snap.symbol.clone())
            .or_default()
            .on_snapshot(snap.update_id);
        let ts = snap.exchange_ts;
        self.publish_pair("market:orderbook_l2_snapshot", snap, Some(ts));
    }

    fn handle_orderbook_delta(&self, delta: OrderbookL2Delta) {
        let outcome = self
            .seq_trackers
            .lock()
            .entry(delta.symbol.clone())
            .or_default()
            .on_delta(delta.update_id);

        match outcome {
            DeltaOutcome::Applied => {
                let ts = delta.exchange_ts;
                self.publish_pair("market:orderbook_l2_delta", delta, Some(ts));
            }
            DeltaOutcome::Dropped => {}
            DeltaOutcome::ResyncRequested(req) => {
                self.bus.publish(
                    "market:resync_requested",
                    ResyncEvent {
                        venue: self.adapter.venue(),
                        symbol: delta.symbol,
                        channel: "orderbook".to_string(),
                        reason: req.reason,
                        last_seq: req.last_seq,
                        update_id: req.update_id,
                    },
                );
            }
        }
    }

    fn publish_connected(&self) {
        info!(venue = %self.adapter.venue(), "ws connected");
        self.bus.publish(
            "market:connected",
            ConnectionEvent {
                venue: self.adapter.venue(),
                stream_id: self.adapter.stream_id(),
            },
        );
    }

    fn publish_disconnected(&self) {
        info!(venue = %self.adapter.venue(), "ws disconnected");
        self.bus.publish(
            "market:disconnected",
            ConnectionEvent {
                venue: self.adapter.venue(),
                stream_id: self.adapter.stream_id(),
            },
        );
    }

    fn publish_error(&self, message: impl Into<String>) {
        self.bus.publish(
            "market:error",
            ErrorEvent {
                venue: self.adapter.venue(),
                stream_id: self.adapter.stream_id(),
                message: message.into(),
            },
        );
    }
}
