//! One client paired with one backend.
//!
//! A Connection drives both legs through their handshakes, pumps messages
//! between them, and tears both down when either ends. Teardown is entered
//! once; whichever leg ends first decides how the other is closed.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::engine::{Engine, MessageSender, Messages, Session, Termination};
use crate::error::Error;
use crate::message::{CloseCode, CloseFrame};
use crate::relay::acceptor::Upgrade;
use crate::relay::connector;
use crate::relay::events::{EventSink, Leg, RelayEvent};
use crate::relay::listener::ProxyConfig;
use crate::relay::synthesize::synthesize;

/// Where a Connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Opening the backend transport.
    #[default]
    Connecting,
    /// Both opening handshakes in flight.
    HandshakeWait,
    /// Messages flowing both ways.
    Relaying,
    /// Tearing down.
    Closing,
    /// Done.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::HandshakeWait => "handshake",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        })
    }
}

/// Bookkeeping for one Connection: its state and its events.
pub struct Connection {
    client: SocketAddr,
    state: ConnectionState,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("client", &self.client)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// A Connection for the client at `client`, about to connect.
    #[must_use]
    pub fn new(client: SocketAddr, events: Arc<dyn EventSink>) -> Self {
        Self {
            client,
            state: ConnectionState::Connecting,
            events,
        }
    }

    /// Client address.
    #[must_use]
    pub const fn client(&self) -> SocketAddr {
        self.client
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Enter teardown. Returns `true` only for the first caller.
    pub fn begin_teardown(&mut self) -> bool {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return false;
        }
        self.advance(ConnectionState::Closing);
        true
    }

    fn advance(&mut self, next: ConnectionState) {
        tracing::trace!(from = %self.state, to = %next, "connection state");
        self.state = next;
    }

    fn record(&self, event: RelayEvent) {
        self.events.record(self.client, event);
    }

    /// Record the terminal event, at most once.
    fn finish(&mut self, event: RelayEvent) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.advance(ConnectionState::Closed);
        self.record(event);
    }

    fn abort(&mut self, error: Error) {
        self.begin_teardown();
        self.finish(RelayEvent::Aborted { error });
    }

    /// Run the Connection to completion over the client transport `io`,
    /// whose upgrade request has already been read.
    ///
    /// Never fails: every outcome ends in one terminal event.
    pub async fn run<S>(mut self, io: S, upgrade: Upgrade, config: Arc<ProxyConfig>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Upgrade { request, buffered } = upgrade;
        self.record(RelayEvent::Accepted {
            target: request.target.clone(),
            forwarded_for: request.forwarded_for().map(str::to_owned),
        });

        let backend = match connector::connect(&config.backend, config.timeouts.connect).await {
            Ok(stream) => stream,
            Err(e) => return self.abort(e),
        };
        if let (Ok(local), Ok(remote)) = (backend.local_addr(), backend.peer_addr()) {
            self.record(RelayEvent::BackendConnected { local, remote });
        }
        let outbound = match synthesize(&request.headers, &request.target) {
            Ok(outbound) => outbound,
            Err(e) => return self.abort(e),
        };

        self.advance(ConnectionState::HandshakeWait);
        let handshake = config.timeouts.handshake;
        let inbound = Engine::server(
            io,
            request,
            buffered,
            Arc::clone(&config.registry),
            config.engine.clone(),
        )
        .with_handshake_timeout(handshake);
        let outbound = Engine::client(
            backend,
            outbound,
            Arc::clone(&config.registry),
            config.engine.clone(),
        )
        .with_handshake_timeout(handshake);

        let grace = config.timeouts.close_grace;
        let (client, backend) = match tokio::join!(inbound.start(), outbound.start()) {
            (Ok(client), Ok(backend)) => (client, backend),
            (Ok(client), Err(e)) => {
                refuse(client, CloseCode::BadGateway, "backend handshake failed", grace).await;
                return self.abort(e);
            }
            (Err(e), Ok(backend)) => {
                refuse(backend, CloseCode::GoingAway, "client handshake failed", grace).await;
                return self.abort(e);
            }
            (Err(e), Err(_)) => return self.abort(e),
        };

        self.advance(ConnectionState::Relaying);
        self.record(RelayEvent::Relaying {
            client_extensions: client.extensions().to_vec(),
            backend_extensions: backend.extensions().to_vec(),
        });
        self.relay(client, backend, grace).await;
    }

    async fn relay(&mut self, client: Session, backend: Session, grace: Duration) {
        let (client_rx, client_tx, client_control) = client.into_parts();
        let (backend_rx, backend_tx, backend_control) = backend.into_parts();
        let upstream = Pump::spawn(Leg::Client, client_rx, backend_tx);
        let downstream = Pump::spawn(Leg::Backend, backend_rx, client_tx);

        let (first, termination) = tokio::select! {
            t = client_control.closed() => (Leg::Client, t),
            t = backend_control.closed() => (Leg::Backend, t),
        };
        if !self.begin_teardown() {
            return;
        }
        tracing::debug!(%first, closing = %first.other(), ?termination, "leg ended");

        // Deliver what the ended leg had already received.
        let (mut drained, other_pump, other_control) = match first {
            Leg::Client => (upstream, downstream, &backend_control),
            Leg::Backend => (downstream, upstream, &client_control),
        };
        if tokio::time::timeout(grace, &mut drained.task).await.is_err() {
            drained.task.abort();
        }
        other_pump.task.abort();

        let frame = closing_frame(first, &termination);
        let _ = tokio::time::timeout(grace, other_control.close(Some(frame))).await;
        tokio::join!(client_control.shutdown(grace), backend_control.shutdown(grace));

        let (client_to_backend, backend_to_client) = match first {
            Leg::Client => (drained.count(), other_pump.count()),
            Leg::Backend => (other_pump.count(), drained.count()),
        };
        self.finish(RelayEvent::Closed {
            first,
            termination,
            client_to_backend,
            backend_to_client,
        });
    }
}

/// Close a leg whose partner never opened.
async fn refuse(session: Session, code: CloseCode, reason: &str, grace: Duration) {
    let (_, _, control) = session.into_parts();
    let _ = tokio::time::timeout(grace, control.close(Some(CloseFrame::new(code, reason)))).await;
    control.shutdown(grace).await;
}

/// How to close the surviving leg once `first` has ended.
///
/// A clean close is forwarded with the peer's own code and reason; a leg
/// that failed or dropped closes the other side with 1014 toward the
/// client or 1001 toward the backend.
fn closing_frame(first: Leg, termination: &Termination) -> CloseFrame {
    match termination {
        Termination::Closed(Some(frame)) if frame.code.is_sendable() => frame.clone(),
        Termination::Closed(_) => CloseFrame::new(CloseCode::Normal, ""),
        Termination::Dropped | Termination::Failed(_) => match first {
            Leg::Backend => CloseFrame::new(CloseCode::BadGateway, "backend connection lost"),
            Leg::Client => CloseFrame::new(CloseCode::GoingAway, "client connection lost"),
        },
    }
}

/// Forwards whole messages from one leg to the other, in order.
struct Pump {
    task: JoinHandle<()>,
    delivered: Arc<AtomicU64>,
}

impl Pump {
    fn spawn(from: Leg, mut source: Messages, sink: MessageSender) -> Self {
        let delivered = Arc::new(AtomicU64::new(0));
        let count = Arc::clone(&delivered);
        let task = tokio::spawn(
            async move {
                while let Some(message) = source.recv().await {
                    tracing::trace!(%from, kind = message.kind(), len = message.len(), "relaying message");
                    if let Err(e) = sink.send(message).await {
                        tracing::debug!(%from, error = %e, "destination closed");
                        break;
                    }
                    count.fetch_add(1, Ordering::Relaxed);
                }
            }
            .in_current_span(),
        );
        Self { task, delivered }
    }

    fn count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}
