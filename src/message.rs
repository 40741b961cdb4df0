//! Relayed messages and close codes (RFC 6455 Section 7.4).

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;

/// WebSocket close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseCode {
    /// 1000, the purpose of the connection was fulfilled.
    #[default]
    Normal,
    /// 1001, the endpoint is going away.
    GoingAway,
    /// 1002, malformed frame or other protocol violation.
    ProtocolError,
    /// 1003, a data type the endpoint cannot accept.
    UnsupportedData,
    /// 1007, payload inconsistent with its type (bad UTF-8).
    InvalidPayload,
    /// 1008, policy violation.
    PolicyViolation,
    /// 1009, message too big to process.
    MessageTooBig,
    /// 1010, a required extension was not negotiated.
    MandatoryExtension,
    /// 1011, unexpected server condition.
    InternalError,
    /// 1014, the upstream a gateway depends on failed.
    BadGateway,
    /// Any other code, including reserved ones received off the wire.
    Other(u16),
}

impl CloseCode {
    /// Map a numeric code to its variant.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1014 => CloseCode::BadGateway,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::BadGateway => 1014,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether an endpoint may put this code in a close frame.
    ///
    /// 1000-1003, 1007-1014 and the 3000-4999 application range are
    /// allowed; 1004-1006 and 1015 are reserved for local reporting.
    #[must_use]
    pub const fn is_sendable(&self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Status code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close status.
    pub code: CloseCode,
    /// UTF-8 reason, at most 123 bytes on the wire.
    pub reason: String,
}

impl CloseFrame {
    /// Largest reason that still fits a control frame next to the code.
    pub const MAX_REASON: usize = MAX_CONTROL_FRAME_PAYLOAD - 2;

    /// Create a close frame, truncating the reason on a character boundary
    /// so it fits a control frame.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > Self::MAX_REASON {
            let mut cut = Self::MAX_REASON;
            while !reason.is_char_boundary(cut) {
                cut -= 1;
            }
            reason.truncate(cut);
        }
        Self { code, reason }
    }

    /// Decode a close frame payload.
    ///
    /// An empty payload means the peer sent no status.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a one-byte payload
    /// - `Error::InvalidCloseCode` for a code that may not appear on the wire
    /// - `Error::InvalidUtf8` for a reason that is not UTF-8
    pub fn decode(payload: &[u8]) -> Result<Option<Self>> {
        match payload {
            [] => Ok(None),
            [_] => Err(Error::ProtocolViolation(
                "close payload of one byte".into(),
            )),
            [hi, lo, reason @ ..] => {
                let code = CloseCode::from_u16(u16::from_be_bytes([*hi, *lo]));
                if !code.is_sendable() {
                    return Err(Error::InvalidCloseCode(code.as_u16()));
                }
                let reason = std::str::from_utf8(reason)?;
                Ok(Some(Self {
                    code,
                    reason: reason.to_owned(),
                }))
            }
        }
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// A complete data message as seen by the relay.
///
/// Control frames never surface here; each engine answers pings and runs
/// the close handshake itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text.
    Text(String),
    /// Arbitrary bytes.
    Binary(Vec<u8>),
}

impl Message {
    /// Text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(b) => b.len(),
        }
    }

    /// Empty payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `"text"` or `"binary"`, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Message::Text(_) => "text",
            Message::Binary(_) => "binary",
        }
    }

    /// Payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(s) => s.as_bytes(),
            Message::Binary(b) => b,
        }
    }
}
