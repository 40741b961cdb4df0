//! WebSocket protocol engines, one per leg.
//!
//! An [`Engine`] is an idle leg wrapped around a transport.
//! [`Engine::start`] runs the opening handshake for its role and returns a
//! [`Session`]: from then on frames, masking, fragmentation, ping/pong and
//! the close handshake are handled internally, and callers only see whole
//! [`Message`](crate::Message)s and one [`Termination`].
//!
//! ```rust,ignore
//! let engine = Engine::client(stream, request, registry, Config::default());
//! let mut session = engine.start().await?;
//! session.send(Message::text("hello")).await?;
//! while let Some(message) = session.recv().await {
//!     println!("{message:?}");
//! }
//! ```

mod fragmenter;
mod handshake;
mod role;
mod session;
mod state;

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Config;
use crate::error::Result;
use crate::extensions::ExtensionRegistry;
use crate::protocol::handshake::{HandshakeRequest, OutboundRequest};

pub use role::Role;
pub use session::{Control, MessageSender, Messages, Session, Termination};
pub use state::EngineState;

enum Setup {
    /// The client's request, already read, and bytes read past it.
    Server {
        request: HandshakeRequest,
        buffered: BytesMut,
    },
    Client {
        request: OutboundRequest,
    },
}

/// A leg before its handshake.
pub struct Engine<S> {
    io: S,
    setup: Setup,
    registry: Arc<ExtensionRegistry>,
    config: Config,
    handshake_timeout: Option<Duration>,
}

impl<S> Engine<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Server-role engine for a client whose upgrade request has been read.
    ///
    /// `buffered` holds any bytes that arrived after the request head.
    #[must_use]
    pub fn server(
        io: S,
        request: HandshakeRequest,
        buffered: BytesMut,
        registry: Arc<ExtensionRegistry>,
        config: Config,
    ) -> Self {
        Self::new(io, Setup::Server { request, buffered }, registry, config)
    }

    /// Client-role engine that will send `request` over a connected
    /// transport.
    #[must_use]
    pub fn client(
        io: S,
        request: OutboundRequest,
        registry: Arc<ExtensionRegistry>,
        config: Config,
    ) -> Self {
        Self::new(io, Setup::Client { request }, registry, config)
    }

    fn new(io: S, setup: Setup, registry: Arc<ExtensionRegistry>, config: Config) -> Self {
        Self {
            io,
            setup,
            registry,
            config,
            handshake_timeout: None,
        }
    }

    /// Bound the whole handshake exchange.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Role this engine plays.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self.setup {
            Setup::Server { .. } => Role::Server,
            Setup::Client { .. } => Role::Client,
        }
    }

    /// Run the opening handshake and open the leg.
    ///
    /// Negotiation happens against this engine's view of the registry only;
    /// nothing is shared with any other leg.
    ///
    /// # Errors
    ///
    /// - `Error::Handshake` for a request this server cannot serve (after
    ///   answering it with 400 or 426), or a backend response that does not
    ///   accept the request
    /// - `Error::Timeout` if the handshake timeout elapses
    /// - `Error::Transport` on I/O failure
    pub async fn start(self) -> Result<Session> {
        let role = self.role();
        let Self {
            mut io,
            setup,
            registry,
            config,
            handshake_timeout,
        } = self;
        tracing::debug!(%role, state = %EngineState::HandshakeExchange, "starting handshake");

        let exchange = async {
            match &setup {
                Setup::Server { request, .. } => handshake::respond(&mut io, request, &registry)
                    .await
                    .map(|negotiation| (negotiation, BytesMut::new())),
                Setup::Client { request } => {
                    let max_head = config.limits.max_handshake_size;
                    handshake::initiate(&mut io, request, &registry, max_head).await
                }
            }
        };
        let outcome = match handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .unwrap_or_else(|elapsed| Err(elapsed.into())),
            None => exchange.await,
        };
        let (negotiation, read_ahead) = outcome.inspect_err(|e| {
            tracing::debug!(%role, error = %e, "handshake failed");
        })?;

        let buffered = match setup {
            Setup::Server { buffered, .. } => buffered,
            Setup::Client { .. } => read_ahead,
        };
        tracing::debug!(%role, extensions = ?negotiation.names(), state = %EngineState::Open, "leg open");
        Ok(Session::spawn(io, role, negotiation, buffered, &config))
    }
}
