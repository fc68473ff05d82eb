//! Crate-wide error type.
//!
//! Library code returns [`Result<T>`] everywhere; `anyhow` is reserved for
//! `main.rs`, which has to collapse heterogeneous startup failures into a
//! single exit path.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;
