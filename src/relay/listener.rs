//! Accepting client connections.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use crate::config::{Config, Timeouts};
use crate::error::{Error, Result};
use crate::extensions::ExtensionRegistry;
use crate::relay::acceptor;
use crate::relay::connection::Connection;
use crate::relay::events::{EventSink, TracingSink};

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8888";

/// Default backend address.
pub const DEFAULT_BACKEND: &str = "127.0.0.1:8855";

/// Everything the relay needs to serve Connections.
///
/// Shared read-only by every Connection.
#[derive(Clone)]
pub struct ProxyConfig {
    /// `host:port` to listen on.
    pub listen: String,
    /// `host:port` of the backend.
    pub backend: String,
    /// Engine configuration, used for both legs.
    pub engine: Config,
    /// Connect, handshake and close timeouts.
    pub timeouts: Timeouts,
    /// Extensions offered to the backend and accepted from clients.
    pub registry: Arc<ExtensionRegistry>,
    /// Where Connection events go.
    pub events: Arc<dyn EventSink>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let engine = Config::default();
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            backend: DEFAULT_BACKEND.to_string(),
            registry: Arc::new(ExtensionRegistry::standard(&engine.limits)),
            engine,
            timeouts: Timeouts::default(),
            events: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("listen", &self.listen)
            .field("backend", &self.backend)
            .field("engine", &self.engine)
            .field("timeouts", &self.timeouts)
            .field("extensions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ProxyConfig {
    /// Defaults: listen on 127.0.0.1:8888, relay to 127.0.0.1:8855.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen address.
    #[must_use]
    pub fn with_listen(mut self, host: &str, port: u16) -> Self {
        self.listen = format!("{host}:{port}");
        self
    }

    /// Set the backend address.
    #[must_use]
    pub fn with_backend(mut self, host: &str, port: u16) -> Self {
        self.backend = format!("{host}:{port}");
        self
    }

    /// Set the engine configuration.
    #[must_use]
    pub fn with_engine(mut self, engine: Config) -> Self {
        self.engine = engine;
        self
    }

    /// Set the timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replace the extension registry.
    #[must_use]
    pub fn with_registry(mut self, registry: ExtensionRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Send Connection events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

/// A bound relay.
pub struct Proxy {
    listener: TcpListener,
    config: Arc<ProxyConfig>,
}

impl Proxy {
    /// Bind the listen address.
    ///
    /// # Errors
    ///
    /// `Error::Transport` if the address cannot be bound.
    pub async fn bind(config: ProxyConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| Error::Transport(format!("bind {}: {e}", config.listen)))?;
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    /// Address actually bound; useful with port 0.
    ///
    /// # Errors
    ///
    /// `Error::Transport` if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve Connections forever.
    ///
    /// # Errors
    ///
    /// Never returns an error at present; accept failures are logged and
    /// the loop continues.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve Connections until `shutdown` completes. Connections already
    /// running are left to finish on their own.
    ///
    /// # Errors
    ///
    /// See [`Proxy::run`].
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            listen = %self.local_addr()?,
            backend = %self.config.backend,
            "relay listening"
        );
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("relay stopped accepting");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, client)) => {
                        let config = Arc::clone(&self.config);
                        let span = tracing::info_span!("conn", %client);
                        tokio::spawn(serve(stream, client, config).instrument(span));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }
    }
}

async fn serve(mut stream: TcpStream, client: SocketAddr, config: Arc<ProxyConfig>) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "set_nodelay failed");
    }
    let limits = &config.engine.limits;
    match acceptor::accept(&mut stream, limits, config.timeouts.handshake).await {
        Ok(upgrade) => {
            Connection::new(client, Arc::clone(&config.events))
                .run(stream, upgrade, config)
                .await;
        }
        Err(e) => tracing::debug!(error = %e, "not proxied"),
    }
}
