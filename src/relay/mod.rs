//! The relay: accept a client upgrade, open a matching backend leg, and
//! forward whole messages between the two until either side ends.
//!
//! Each leg negotiates its own extensions. Messages are decoded on the
//! leg they arrive on and re-encoded for the leg they leave on, so a
//! compressing client can talk to a backend that does not compress.
//!
//! ```rust,ignore
//! let proxy = Proxy::bind(ProxyConfig::new().with_backend("127.0.0.1", 8855)).await?;
//! proxy.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

mod acceptor;
mod connection;
mod connector;
mod events;
mod listener;
mod synthesize;

pub use acceptor::{Upgrade, accept};
pub use connection::{Connection, ConnectionState};
pub use connector::connect;
pub use events::{EventSink, Leg, RelayEvent, TracingSink};
pub use listener::{DEFAULT_BACKEND, DEFAULT_LISTEN, Proxy, ProxyConfig};
pub use synthesize::synthesize;
