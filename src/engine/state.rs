//! Protocol engine lifecycle.

use std::fmt;

/// Engine state.
///
/// `Idle → HandshakeExchange → Open → Closing → Closed`, with `Errored`
/// reachable from any state that is not terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum EngineState {
    /// Created, handshake not started.
    #[default]
    Idle,
    /// Handshake in flight.
    HandshakeExchange,
    /// Messages flow both ways.
    Open,
    /// We sent a close frame and wait for the peer's.
    Closing,
    /// Close handshake finished or the transport ended.
    Closed,
    /// Ended by an error.
    Errored,
}

impl EngineState {
    /// `Closed` or `Errored`.
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Closed | EngineState::Errored)
    }

    /// Only an open engine accepts new messages.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, EngineState::Open)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::HandshakeExchange => "handshake",
            EngineState::Open => "open",
            EngineState::Closing => "closing",
            EngineState::Closed => "closed",
            EngineState::Errored => "errored",
        };
        f.write_str(name)
    }
}
