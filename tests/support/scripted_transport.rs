//! A scriptable [`WsTransport`] double, mirroring the `MockTransport` used by
//! `ws_client`'s own unit tests but exposed here for black-box integration
//! tests that only see the public crate surface.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use backbone::error::Result;
use backbone::exchange::transport::{TransportMessage, WsTransport};

#[derive(Clone)]
pub struct ScriptedTransport {
    pub connect_calls: Arc<AtomicUsize>,
    pub close_calls: Arc<AtomicUsize>,
    pub sent: Arc<AsyncMutex<Vec<String>>>,
    inbound: Arc<AsyncMutex<VecDeque<TransportMessage>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            connect_calls: Arc::new(AtomicUsize::new(0)),
            close_calls: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(AsyncMutex::new(Vec::new())),
            inbound: Arc::new(AsyncMutex::new(VecDeque::new())),
        }
    }

    pub async fn push(&self, msg: TransportMessage) {
        self.inbound.lock().await.push_back(msg);
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WsTransport for ScriptedTransport {
    async fn connect(&mut self, _url: &str) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sent.lock().await.push(text);
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn recv(&mut self) -> Option<TransportMessage> {
        loop {
            if let Some(msg) = self.inbound.lock().await.pop_front() {
                return Some(msg);
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
