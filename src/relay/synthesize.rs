//! Building the backend's upgrade request from the client's.

use crate::error::{Error, Result};
use crate::protocol::handshake::{OutboundRequest, WS_VERSION, compute_accept_key, validate_key};
use crate::protocol::headers::HeaderMap;

/// Headers set explicitly on the outbound request, never copied.
const EXPLICIT: [&str; 4] = [
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

fn is_copied(name: &str) -> bool {
    let prefix = "sec-websocket";
    let is_websocket = name.len() >= prefix.len()
        && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes());
    !is_websocket && !EXPLICIT.iter().any(|e| e.eq_ignore_ascii_case(name))
}

/// Derive the backend handshake from the client's headers and target.
///
/// The result starts from an empty header set: `Upgrade`, `Connection`,
/// the client's own `Sec-WebSocket-Key` and `Sec-WebSocket-Version: 13`,
/// then every other client header in order, except those whose name
/// starts with `sec-websocket`. The accept value the backend must answer
/// with is computed here and cached on the request.
///
/// # Errors
///
/// `Error::Handshake` if the key is missing or malformed, or the target is
/// not a valid request target.
pub fn synthesize(original: &HeaderMap, target: &str) -> Result<OutboundRequest> {
    let key = original
        .get("sec-websocket-key")
        .ok_or_else(|| Error::Handshake("missing Sec-WebSocket-Key".into()))?;
    validate_key(key)?;
    if target.is_empty() || target.contains(char::is_whitespace) {
        return Err(Error::Handshake(format!("invalid request target {target:?}")));
    }

    let mut headers = HeaderMap::new();
    headers.insert("Upgrade", "websocket")?;
    headers.insert("Connection", "Upgrade")?;
    headers.insert("Sec-WebSocket-Key", key)?;
    headers.insert("Sec-WebSocket-Version", WS_VERSION)?;
    for (name, value) in original.iter().filter(|(name, _)| is_copied(name)) {
        headers.append(name, value)?;
    }

    Ok(OutboundRequest {
        target: target.to_string(),
        headers,
        key: key.to_string(),
        expected_accept: compute_accept_key(key),
    })
}
