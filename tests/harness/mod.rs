//! Test harness for end-to-end relay testing.
//!
//! A backend built from the crate's own server engine, a client built from
//! its client engine, and a relay in between whose events are recorded.

#![allow(dead_code)]

mod client;
mod server;
mod sink;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wsbridge::config::Timeouts;
use wsbridge::{Proxy, ProxyConfig};

pub use client::{ClientOptions, TestClient};
pub use server::{ServerMode, ServerOptions, TestServer};
pub use sink::RecordingSink;

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

/// A relay on an ephemeral port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub events: Arc<RecordingSink>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<wsbridge::Result<()>>,
}

impl TestRelay {
    /// Relay to `backend` with default settings.
    pub async fn spawn(backend: SocketAddr) -> Self {
        Self::spawn_with(backend, ProxyConfig::new()).await
    }

    /// Relay to `backend`, starting from `config`. Listen address, backend
    /// and event sink are overridden.
    pub async fn spawn_with(backend: SocketAddr, config: ProxyConfig) -> Self {
        let events = Arc::new(RecordingSink::default());
        let config = config
            .with_listen("127.0.0.1", 0)
            .with_backend(&backend.ip().to_string(), backend.port())
            .with_events(events.clone());
        let proxy = Proxy::bind(config).await.unwrap();
        let addr = proxy.local_addr().unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(proxy.run_until(async {
            let _ = stopped.await;
        }));
        Self {
            addr,
            events,
            stop: Some(stop),
            task,
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

/// Timeouts short enough for failure tests.
pub fn quick_timeouts() -> Timeouts {
    Timeouts::default()
        .with_connect(Some(Duration::from_secs(2)))
        .with_handshake(Some(Duration::from_secs(2)))
        .with_close_grace(Duration::from_secs(1))
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
