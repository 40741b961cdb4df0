//! The opening handshake as driven by each role.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::codec::read_head;
use crate::error::{Error, Result};
use crate::extensions::{ExtensionRegistry, Negotiation};
use crate::protocol::handshake::{
    HandshakeRequest, HandshakeResponse, OutboundRequest, WS_VERSION, validate_key,
};

async fn write_response<S>(io: &mut S, response: &HandshakeResponse) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    response.write_to(&mut buf);
    io.write_all(&buf).await?;
    io.flush().await?;
    Ok(())
}

/// Server role: answer an upgrade request that has already been read.
///
/// A request this engine cannot serve gets an HTTP refusal before the
/// error is returned.
pub(crate) async fn respond<S>(
    io: &mut S,
    request: &HandshakeRequest,
    registry: &ExtensionRegistry,
) -> Result<Negotiation>
where
    S: AsyncWrite + Unpin,
{
    let key = match request.key().map(|key| (key, validate_key(key))) {
        Some((key, Ok(()))) => key,
        Some((_, Err(e))) => {
            write_response(io, &HandshakeResponse::rejection(400, "Bad Request")).await?;
            return Err(e);
        }
        None => {
            write_response(io, &HandshakeResponse::rejection(400, "Bad Request")).await?;
            return Err(Error::Handshake("missing Sec-WebSocket-Key".into()));
        }
    };
    if request.version() != Some(WS_VERSION) {
        write_response(io, &HandshakeResponse::rejection(426, "Upgrade Required")).await?;
        return Err(Error::Handshake(format!(
            "unsupported Sec-WebSocket-Version {:?}",
            request.version().unwrap_or_default()
        )));
    }

    let negotiation = registry.negotiate(request.extensions_header().as_deref());
    let response =
        HandshakeResponse::switching_protocols(key, negotiation.response_header().as_deref())?;
    write_response(io, &response).await?;
    Ok(negotiation)
}

/// Client role: send `request`, then read and check the response.
///
/// Returns the negotiated extensions and any bytes that arrived after the
/// response head.
pub(crate) async fn initiate<S>(
    io: &mut S,
    request: &OutboundRequest,
    registry: &ExtensionRegistry,
    max_head: usize,
) -> Result<(Negotiation, BytesMut)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(512);
    request.write_to(&mut buf, registry.offer_header().as_deref())?;
    io.write_all(&buf).await?;
    io.flush().await?;

    let mut head = BytesMut::with_capacity(1024);
    let len = read_head(io, &mut head, max_head)
        .await
        .map_err(|e| match e {
            Error::ConnectionClosed(_) => {
                Error::Handshake("backend closed the connection during the handshake".into())
            }
            other => other,
        })?;
    let response = HandshakeResponse::parse(&head[..len])?;
    head.advance(len);

    response.validate_accept(&request.expected_accept)?;
    let negotiation = registry.activate(response.extensions_header().as_deref())?;
    Ok((negotiation, head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::protocol::handshake::compute_accept_key;
    use tokio::io::{AsyncReadExt, duplex};

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn request(extra: &str) -> HandshakeRequest {
        let text = format!(
            "GET /chat HTTP/1.1\r\nHost: a\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Key: {KEY}\r\n{extra}\r\n"
        );
        HandshakeRequest::parse(text.as_bytes()).unwrap()
    }

    async fn response_text(
        request: HandshakeRequest,
        registry: ExtensionRegistry,
    ) -> (Result<Negotiation>, String) {
        let (mut ours, mut theirs) = duplex(4096);
        let result = respond(&mut ours, &request, &registry).await;
        drop(ours);
        let mut text = String::new();
        theirs.read_to_string(&mut text).await.unwrap();
        (result, text)
    }

    #[tokio::test]
    async fn test_respond_switching_protocols_with_deflate() {
        let (result, text) = response_text(
            request("Sec-WebSocket-Version: 13\r\nSec-WebSocket-Extensions: permessage-deflate\r\n"),
            ExtensionRegistry::standard(&Limits::default()),
        )
        .await;
        let negotiation = result.unwrap();
        assert_eq!(negotiation.names(), ["permessage-deflate"]);
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.contains("Sec-WebSocket-Extensions: permessage-deflate\r\n"));
    }

    #[tokio::test]
    async fn test_respond_without_extensions() {
        let (result, text) = response_text(
            request("Sec-WebSocket-Version: 13\r\nSec-WebSocket-Extensions: permessage-deflate\r\n"),
            ExtensionRegistry::new(),
        )
        .await;
        assert!(result.unwrap().accepted().is_empty());
        assert!(!text.contains("Sec-WebSocket-Extensions"));
    }

    #[tokio::test]
    async fn test_respond_rejects_wrong_version() {
        let (result, text) = response_text(
            request("Sec-WebSocket-Version: 8\r\n"),
            ExtensionRegistry::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::Handshake(_))));
        assert!(text.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
    }

    #[tokio::test]
    async fn test_respond_rejects_malformed_key() {
        let text = "GET / HTTP/1.1\r\nSec-WebSocket-Key: short\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let (result, text) = response_text(
            HandshakeRequest::parse(text.as_bytes()).unwrap(),
            ExtensionRegistry::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::Handshake(_))));
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    async fn run_initiate(reply: impl FnOnce(&str) -> Vec<u8>) -> Result<(Negotiation, BytesMut)> {
        let request = OutboundRequest::new("/feed?x=1", "backend").unwrap();
        let reply = reply(&request.expected_accept);
        let (mut ours, mut theirs) = duplex(8192);

        let peer = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            let len = read_head(&mut theirs, &mut buf, 8192).await.unwrap();
            let head = String::from_utf8(buf[..len].to_vec()).unwrap();
            theirs.write_all(&reply).await.unwrap();
            head
        });

        let registry = ExtensionRegistry::standard(&Limits::default());
        let result = initiate(&mut ours, &request, &registry, 8192).await;
        let head = peer.await.unwrap();
        assert!(head.starts_with("GET /feed?x=1 HTTP/1.1\r\n"));
        assert!(head.contains("Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n"));
        result
    }

    #[tokio::test]
    async fn test_initiate_accepts_valid_response() {
        let (negotiation, rest) = run_initiate(|accept| {
            let mut reply = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {accept}\r\n\
                 Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits=12\r\n\r\n"
            )
            .into_bytes();
            reply.extend_from_slice(b"\x81\x00");
            reply
        })
        .await
        .unwrap();
        assert_eq!(negotiation.names(), ["permessage-deflate"]);
        assert_eq!(&rest[..], b"\x81\x00");
    }

    #[tokio::test]
    async fn test_initiate_rejects_accept_mismatch() {
        let wrong = compute_accept_key(KEY);
        let err = run_initiate(|_| {
            format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {wrong}\r\n\r\n"
            )
            .into_bytes()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Handshake(ref m) if m.contains("mismatch")));
    }

    #[tokio::test]
    async fn test_initiate_rejects_non_101() {
        let err = run_initiate(|_| "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Handshake(ref m) if m.contains("403")));
    }

    #[tokio::test]
    async fn test_initiate_rejects_unoffered_extension() {
        let err = run_initiate(|accept| {
            format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {accept}\r\nSec-WebSocket-Extensions: x-custom\r\n\r\n"
            )
            .into_bytes()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Handshake(_)));
    }
}
