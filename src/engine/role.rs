//! Which end of the WebSocket a leg plays.

use std::fmt;

/// Role of one protocol engine.
///
/// The client-facing leg is a server; the backend-facing leg is a client.
/// The role fixes the masking direction (RFC 6455 Section 5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Masks every frame it sends; expects unmasked frames.
    Client,
    /// Never masks; expects masked frames.
    Server,
}

impl Role {
    /// Outgoing frames must be masked.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}
