//! The WS transport seam. [`WsClient`](super::ws_client::WsClient) is generic
//! over [`WsTransport`] so tests can swap in an in-memory double instead of
//! opening a real socket, the way the teacher's `MarketDataStream` trait
//! lets `ReconnectingDataStream` wrap anything.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(String),
    Ping,
    Pong,
    Close,
}

#[async_trait]
pub trait WsTransport: Send {
    async fn connect(&mut self, url: &str) -> Result<()>;
    async fn send_text(&mut self, text: String) -> Result<()>;
    /// Outbound pings are sent "silently" — failures here must not be logged.
    async fn send_ping(&mut self) -> Result<()>;
    /// `None` means the stream ended (peer closed, or was never connected).
    async fn recv(&mut self) -> Option<TransportMessage>;
    async fn close(&mut self) -> Result<()>;
}

pub struct TungsteniteTransport {
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self { stream: None }
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WsTransport for TungsteniteTransport {
    async fn connect(&mut self, url: &str) -> Result<()> {
        let (stream, _response) = connect_async(url).await?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.send(Message::Text(text)).await?;
        }
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.send(Message::Ping(Vec::new())).await?;
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<TransportMessage> {
        let stream = self.stream.as_mut()?;
        loop {
            return match stream.next().await {
                Some(Ok(Message::Text(text))) => Some(TransportMessage::Text(text)),
                Some(Ok(Message::Ping(_))) => Some(TransportMessage::Ping),
                Some(Ok(Message::Pong(_))) => Some(TransportMessage::Pong),
                Some(Ok(Message::Close(_))) => Some(TransportMessage::Close),
                Some(Ok(_)) => continue, // binary/frame frames carry no channel data here
                Some(Err(_)) => None,
                None => None,
            };
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
        Ok(())
    }
}
