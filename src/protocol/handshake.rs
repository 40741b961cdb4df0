//! Opening handshake wire forms (RFC 6455 Section 4).
//!
//! Three messages cross the wire per Connection: the client's upgrade
//! request (parsed as [`HandshakeRequest`]), the request the relay sends to
//! the backend ([`OutboundRequest`]), and a [`HandshakeResponse`] on each leg.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::protocol::headers::{HeaderMap, validate_header_value};

/// GUID appended to the key when deriving `Sec-WebSocket-Accept`.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version spoken on either leg.
pub const WS_VERSION: &str = "13";

/// Headers that must not appear twice in an upgrade request.
const SINGLE_VALUED: [&str; 4] = [
    "host",
    "sec-websocket-key",
    "sec-websocket-version",
    "upgrade",
];

/// Derive `Sec-WebSocket-Accept` from `Sec-WebSocket-Key`:
/// `base64(sha1(key + GUID))`.
///
/// ```
/// use wsbridge::protocol::handshake::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Check that a key is base64 of exactly 16 bytes.
///
/// # Errors
///
/// `Error::Handshake` describing what is wrong with the key.
pub fn validate_key(key: &str) -> Result<()> {
    let decoded = BASE64
        .decode(key)
        .map_err(|_| Error::Handshake("Sec-WebSocket-Key is not valid base64".into()))?;
    if decoded.len() != 16 {
        return Err(Error::Handshake(format!(
            "Sec-WebSocket-Key must decode to 16 bytes, got {}",
            decoded.len()
        )));
    }
    Ok(())
}

/// Fresh random key for a client-initiated handshake.
///
/// # Errors
///
/// `Error::Transport` if the OS random source fails.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::Transport(format!("random source: {e}")))?;
    Ok(BASE64.encode(nonce))
}

fn head_text(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|_| Error::Handshake("handshake head is not UTF-8".into()))
}

/// An HTTP request received on the listening socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request method.
    pub method: String,
    /// Path and query, exactly as received.
    pub target: String,
    /// Headers in arrival order.
    pub headers: HeaderMap,
}

impl HandshakeRequest {
    /// Parse a request head (request line and headers).
    ///
    /// Any HTTP request parses; whether it is a WebSocket upgrade is decided
    /// by [`validate_upgrade`](Self::validate_upgrade).
    ///
    /// # Errors
    ///
    /// `Error::UpgradeRejected` for anything that is not a well-formed
    /// HTTP/1.1 request head.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let reject = |e: Error| Error::UpgradeRejected(e.to_string());

        let text = head_text(data).map_err(reject)?;
        let mut lines = text.split("\r\n");
        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::UpgradeRejected("empty request".into()))?;

        let mut parts = request_line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::UpgradeRejected(format!(
                "malformed request line: {request_line:?}"
            )));
        };
        if version != "HTTP/1.1" {
            return Err(Error::UpgradeRejected(format!("unsupported HTTP version {version}")));
        }
        if target.is_empty() {
            return Err(Error::UpgradeRejected("empty request target".into()));
        }

        let headers = HeaderMap::parse_lines(lines).map_err(reject)?;
        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            headers,
        })
    }

    /// Decide whether this request asks for a WebSocket upgrade this relay
    /// can serve: `GET`, `Upgrade: websocket`, `Connection: upgrade`, a
    /// single key and a single version header.
    ///
    /// The key's format is left to the handshake synthesis; the version
    /// value is checked separately by [`version`](Self::version).
    ///
    /// # Errors
    ///
    /// `Error::UpgradeRejected` naming the first missing requirement.
    pub fn validate_upgrade(&self) -> Result<()> {
        if self.method != "GET" {
            return Err(Error::UpgradeRejected(format!(
                "method {} cannot upgrade",
                self.method
            )));
        }
        if !self.headers.has_token("upgrade", "websocket") {
            return Err(Error::UpgradeRejected("missing Upgrade: websocket".into()));
        }
        if !self.headers.has_token("connection", "upgrade") {
            return Err(Error::UpgradeRejected("missing Connection: upgrade".into()));
        }
        for name in SINGLE_VALUED {
            if self.headers.count(name) > 1 {
                return Err(Error::UpgradeRejected(format!("duplicate {name} header")));
            }
        }
        if self.key().is_none() {
            return Err(Error::UpgradeRejected("missing Sec-WebSocket-Key".into()));
        }
        if self.version().is_none() {
            return Err(Error::UpgradeRejected("missing Sec-WebSocket-Version".into()));
        }
        Ok(())
    }

    /// `Sec-WebSocket-Key`, as sent.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.headers.get("sec-websocket-key")
    }

    /// `Sec-WebSocket-Version`, as sent.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.headers.get("sec-websocket-version")
    }

    /// Every `Sec-WebSocket-Extensions` value, joined as one list.
    #[must_use]
    pub fn extensions_header(&self) -> Option<String> {
        join_values(&self.headers, "sec-websocket-extensions")
    }

    /// `X-Forwarded-For`, if a front proxy set it.
    #[must_use]
    pub fn forwarded_for(&self) -> Option<&str> {
        self.headers.get("x-forwarded-for")
    }
}

fn join_values(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers.get_all(name).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

/// The upgrade request sent to the backend, plus the accept value the
/// backend's response must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Path and query forwarded from the inbound request.
    pub target: String,
    /// Headers in wire order. `Sec-WebSocket-Extensions` is added when the
    /// request is written, from the leg's own extension offer.
    pub headers: HeaderMap,
    /// Key sent in `Sec-WebSocket-Key`.
    pub key: String,
    /// Cached `Sec-WebSocket-Accept` expected back. Never written.
    pub expected_accept: String,
}

impl OutboundRequest {
    /// Request with a fresh random key and only the mandatory headers.
    ///
    /// # Errors
    ///
    /// `Error::Transport` if no key could be generated.
    pub fn new(target: impl Into<String>, host: &str) -> Result<Self> {
        let key = generate_key()?;
        let mut headers = HeaderMap::new();
        headers.append("Host", host)?;
        headers.append("Upgrade", "websocket")?;
        headers.append("Connection", "Upgrade")?;
        headers.append("Sec-WebSocket-Key", key.as_str())?;
        headers.append("Sec-WebSocket-Version", WS_VERSION)?;
        Ok(Self {
            target: target.into(),
            headers,
            expected_accept: compute_accept_key(&key),
            key,
        })
    }

    /// Serialize the request head, adding `extension_offer` if non-empty.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHeaderValue` if the target or offer contains CR/LF.
    pub fn write_to(&self, buf: &mut Vec<u8>, extension_offer: Option<&str>) -> Result<()> {
        if self.target.contains([' ', '\r', '\n']) {
            return Err(Error::InvalidHeaderValue {
                header: "request-target".into(),
                reason: "contains whitespace".into(),
            });
        }
        buf.extend_from_slice(b"GET ");
        buf.extend_from_slice(self.target.as_bytes());
        buf.extend_from_slice(b" HTTP/1.1\r\n");
        self.headers.write_to(buf);
        if let Some(offer) = extension_offer.filter(|o| !o.is_empty()) {
            validate_header_value("Sec-WebSocket-Extensions", offer)?;
            buf.extend_from_slice(b"Sec-WebSocket-Extensions: ");
            buf.extend_from_slice(offer.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// An HTTP response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Headers in wire order.
    pub headers: HeaderMap,
}

impl HandshakeResponse {
    /// `101 Switching Protocols` for a request carrying `key`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHeaderValue` if `extensions` contains CR/LF.
    pub fn switching_protocols(key: &str, extensions: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.append("Upgrade", "websocket")?;
        headers.append("Connection", "Upgrade")?;
        headers.append("Sec-WebSocket-Accept", compute_accept_key(key))?;
        if let Some(ext) = extensions.filter(|e| !e.is_empty()) {
            headers.append("Sec-WebSocket-Extensions", ext)?;
        }
        Ok(Self {
            status: 101,
            reason: "Switching Protocols".into(),
            headers,
        })
    }

    /// Plain refusal that closes the connection, e.g. `400 Bad Request`.
    #[must_use]
    pub fn rejection(status: u16, reason: &str) -> Self {
        let mut headers = HeaderMap::new();
        let _ = headers.append("Connection", "close");
        let _ = headers.append("Content-Length", "0");
        if status == 426 {
            let _ = headers.append("Sec-WebSocket-Version", WS_VERSION);
        }
        Self {
            status,
            reason: reason.to_string(),
            headers,
        }
    }

    /// Serialize the response head.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes());
        self.headers.write_to(buf);
        buf.extend_from_slice(b"\r\n");
    }

    /// Parse a response head.
    ///
    /// # Errors
    ///
    /// `Error::Handshake` if the status line or headers are malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = head_text(data)?;
        let mut lines = text.split("\r\n");
        let status_line = lines
            .next()
            .ok_or_else(|| Error::Handshake("empty response".into()))?;

        let mut parts = status_line.splitn(3, ' ');
        let (Some("HTTP/1.1"), Some(code)) = (parts.next(), parts.next()) else {
            return Err(Error::Handshake(format!(
                "malformed status line: {status_line:?}"
            )));
        };
        let status = code
            .parse::<u16>()
            .map_err(|_| Error::Handshake(format!("malformed status code: {code:?}")))?;

        Ok(Self {
            status,
            reason: parts.next().unwrap_or_default().to_string(),
            headers: HeaderMap::parse_lines(lines)?,
        })
    }

    /// Check that this is an acceptance of a request whose cached accept
    /// value is `expected_accept`.
    ///
    /// # Errors
    ///
    /// `Error::Handshake` for a non-101 status, missing upgrade headers, or
    /// an accept value that does not match.
    pub fn validate_accept(&self, expected_accept: &str) -> Result<()> {
        if self.status != 101 {
            return Err(Error::Handshake(format!(
                "backend answered {} {}",
                self.status, self.reason
            )));
        }
        if !self.headers.has_token("upgrade", "websocket") {
            return Err(Error::Handshake("response lacks Upgrade: websocket".into()));
        }
        if !self.headers.has_token("connection", "upgrade") {
            return Err(Error::Handshake("response lacks Connection: upgrade".into()));
        }
        match self.headers.get("sec-websocket-accept") {
            Some(accept) if accept == expected_accept => Ok(()),
            Some(accept) => Err(Error::Handshake(format!(
                "Sec-WebSocket-Accept mismatch: got {accept}, expected {expected_accept}"
            ))),
            None => Err(Error::Handshake("response lacks Sec-WebSocket-Accept".into())),
        }
    }

    /// Every `Sec-WebSocket-Extensions` value, joined as one list.
    #[must_use]
    pub fn extensions_header(&self) -> Option<String> {
        join_values(&self.headers, "sec-websocket-extensions")
    }
}
