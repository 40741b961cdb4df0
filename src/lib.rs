//! # wsbridge - transparent WebSocket reverse proxy
//!
//! `wsbridge` accepts a WebSocket upgrade from a client, opens a second
//! WebSocket connection to a fixed backend, and relays whole messages
//! between the two as if they were one connection.
//!
//! ## Features
//!
//! - **Handshake synthesis**: the backend sees the client's own key, target
//!   and headers, minus anything WebSocket-specific
//! - **Two RFC 6455 engines** per connection, one per leg, each doing its
//!   own framing, masking, fragmentation, ping/pong and close handshake
//! - **Per-leg extension negotiation** with permessage-deflate (RFC 7692)
//! - **Consistent teardown**: the first leg to end closes the other,
//!   exactly once
//! - **Bounded resources**: size limits, bounded queues for backpressure,
//!   connect and handshake timeouts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsbridge::{Proxy, ProxyConfig};
//!
//! let config = ProxyConfig::new()
//!     .with_listen("127.0.0.1", 8888)
//!     .with_backend("127.0.0.1", 8855);
//! Proxy::bind(config).await?.run().await?;
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;
pub mod relay;

pub use config::{Config, Limits, Timeouts};
pub use engine::{Engine, EngineState, Role, Session, Termination};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{HeaderMap, WS_GUID, compute_accept_key};
pub use relay::{ConnectionState, EventSink, Proxy, ProxyConfig, RelayEvent};
