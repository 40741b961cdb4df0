//! Connection lifecycle events.

use std::fmt;
use std::net::SocketAddr;

use crate::engine::Termination;
use crate::error::Error;

/// One of the two legs of a Connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// Client to relay; the relay plays the server role.
    Client,
    /// Relay to backend; the relay plays the client role.
    Backend,
}

impl Leg {
    /// The opposite leg.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Leg::Client => Leg::Backend,
            Leg::Backend => Leg::Client,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Leg::Client => "client",
            Leg::Backend => "backend",
        })
    }
}

/// What happened to a Connection.
///
/// Each Connection records exactly one terminal event, either
/// [`RelayEvent::Aborted`] or [`RelayEvent::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RelayEvent {
    /// A valid upgrade request arrived.
    Accepted {
        /// Request target, forwarded verbatim.
        target: String,
        /// `X-Forwarded-For`, if the client sent one.
        forwarded_for: Option<String>,
    },
    /// The backend transport is up.
    BackendConnected {
        /// Relay side of the backend socket.
        local: SocketAddr,
        /// Backend side.
        remote: SocketAddr,
    },
    /// Both handshakes completed; messages now flow.
    Relaying {
        /// Extensions active on the client leg.
        client_extensions: Vec<String>,
        /// Extensions active on the backend leg.
        backend_extensions: Vec<String>,
    },
    /// The Connection ended before relaying started.
    Aborted {
        /// Why.
        error: Error,
    },
    /// Relaying ended.
    Closed {
        /// The leg that ended first.
        first: Leg,
        /// How it ended.
        termination: Termination,
        /// Messages delivered from client to backend.
        client_to_backend: u64,
        /// Messages delivered from backend to client.
        backend_to_client: u64,
    },
}

impl RelayEvent {
    /// Whether this event ends the Connection.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Aborted { .. } | RelayEvent::Closed { .. })
    }
}

/// Receives the events of every Connection.
///
/// Called from many tasks at once.
pub trait EventSink: Send + Sync {
    /// Record `event` for the Connection of the client at `client`.
    fn record(&self, client: SocketAddr, event: RelayEvent);
}

/// Writes events to `tracing`.
///
/// Opening and closing summaries go out at `info`, the steps between at
/// `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, client: SocketAddr, event: RelayEvent) {
        match event {
            RelayEvent::Accepted {
                target,
                forwarded_for,
            } => {
                tracing::debug!(%client, %target, forwarded_for = forwarded_for.as_deref(), "upgrade accepted");
            }
            RelayEvent::BackendConnected { local, remote } => {
                tracing::debug!(%client, %local, %remote, "backend connected");
            }
            RelayEvent::Relaying {
                client_extensions,
                backend_extensions,
            } => {
                tracing::info!(%client, ?client_extensions, ?backend_extensions, "relaying");
            }
            RelayEvent::Aborted { error } => {
                tracing::info!(%client, %error, "connection aborted");
            }
            RelayEvent::Closed {
                first,
                termination,
                client_to_backend,
                backend_to_client,
            } => {
                tracing::info!(
                    %client,
                    %first,
                    clean = termination.is_clean(),
                    ?termination,
                    client_to_backend,
                    backend_to_client,
                    "connection closed"
                );
            }
        }
    }
}
