//! A raw-socket HTTP stand-in for exercising [`RestClient`] against a
//! canned status code without pulling in a mock-server crate, the same way
//! the teacher repo's `exchange_tests.rs` drives a timeout test off a bare
//! `TcpListener`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Always answers every accepted connection with `status_line` and closes.
/// `requests` counts accepted connections so tests can assert how many
/// attempts actually reached the network.
pub struct AlwaysFailingServer {
    pub addr: std::net::SocketAddr,
    pub requests: Arc<AtomicU32>,
    handle: JoinHandle<()>,
}

impl AlwaysFailingServer {
    pub async fn spawn(status_line: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&requests);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(status_line.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { addr, requests, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for AlwaysFailingServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
