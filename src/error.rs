//! Error types for the relay and its WebSocket engines.
//!
//! Every failure is local to one Connection: the relay tears that
//! Connection down and keeps serving others. Frame-level variants map to
//! the close code sent to the offending peer via [`Error::close_code`].

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while accepting, bridging or relaying a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The request is not a WebSocket upgrade; it is not proxied.
    #[error("Upgrade rejected: {0}")]
    UpgradeRejected(String),

    /// The transport to the backend could not be established.
    #[error("Backend connect to {addr} failed: {reason}")]
    BackendConnect {
        /// Backend `host:port`.
        addr: String,
        /// Rendered cause.
        reason: String,
    },

    /// Key/accept mismatch, missing or malformed key, or non-101 response.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Handshake head exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A header value would break the HTTP head (CR or LF).
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why it was refused.
        reason: String,
    },

    /// A bounded wait elapsed.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O error on one of the raw sockets.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer or the local side has closed the connection.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Frame length field does not fit in `usize`.
    #[error("Payload length {size} exceeds platform maximum {max}")]
    PayloadTooLargeForPlatform {
        /// Declared length.
        size: u64,
        /// Largest addressable length.
        max: u64,
    },

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Invalid or reserved close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Opcode outside the 4-bit range.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked frame received by the server role.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked frame received by the client role.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without a negotiated extension claiming them.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// An extension failed to transform a payload.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Invalid extension parameters or negotiation.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),
}

impl Error {
    /// Whether this error is a WebSocket protocol violation by the peer.
    ///
    /// Violations end the leg with a close frame carrying
    /// [`close_code`](Self::close_code); everything else (transport
    /// failures, timeouts, handshake errors) does not.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::ProtocolViolation(_)
                | Error::InvalidFrame(_)
                | Error::InvalidUtf8
                | Error::FrameTooLarge { .. }
                | Error::MessageTooLarge { .. }
                | Error::TooManyFragments { .. }
                | Error::PayloadTooLargeForPlatform { .. }
                | Error::InvalidCloseCode(_)
                | Error::InvalidOpcode(_)
                | Error::ReservedOpcode(_)
                | Error::FragmentedControlFrame
                | Error::ControlFrameTooLarge(_)
                | Error::UnmaskedClientFrame
                | Error::MaskedServerFrame
                | Error::ReservedBitsSet
                | Error::Extension(_)
                | Error::InvalidExtension(_)
        )
    }

    /// Close code to send to the peer that caused this error.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Error::InvalidUtf8 => CloseCode::InvalidPayload,
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::TooManyFragments { .. }
            | Error::PayloadTooLargeForPlatform { .. } => CloseCode::MessageTooBig,
            Error::Timeout(_) | Error::Transport(_) => CloseCode::GoingAway,
            _ => CloseCode::ProtocolError,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(err.to_string())
    }
}
