//! Deciding whether an accepted socket carries a WebSocket upgrade.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::codec::read_head;
use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::handshake::{HandshakeRequest, HandshakeResponse, WS_VERSION};

/// A valid upgrade request and any bytes the client sent after it.
#[derive(Debug)]
pub struct Upgrade {
    /// The parsed request.
    pub request: HandshakeRequest,
    /// Bytes past the request head; the client's first frames.
    pub buffered: BytesMut,
}

async fn refuse<S>(io: &mut S, status: u16, reason: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(128);
    HandshakeResponse::rejection(status, reason).write_to(&mut buf);
    io.write_all(&buf).await?;
    io.shutdown().await?;
    Ok(())
}

/// Read the request head from a newly accepted socket and check that it is
/// an upgrade the relay can proxy.
///
/// Requests that are not upgrades are answered with `400 Bad Request`; a
/// version other than 13 with `426 Upgrade Required`. Neither is proxied.
///
/// # Errors
///
/// - `Error::UpgradeRejected` after such a refusal was sent
/// - `Error::Timeout`, `Error::ConnectionClosed` or `Error::Transport` if
///   the head never arrived; nothing is sent back
pub async fn accept<S>(io: &mut S, limits: &Limits, timeout: Option<Duration>) -> Result<Upgrade>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    let read = read_head(io, &mut buf, limits.max_handshake_size);
    let len = match timeout {
        Some(limit) => tokio::time::timeout(limit, read).await?,
        None => read.await,
    };
    let len = match len {
        Ok(len) => len,
        Err(e @ Error::HandshakeTooLarge { .. }) => {
            refuse(io, 400, "Bad Request").await?;
            return Err(Error::UpgradeRejected(e.to_string()));
        }
        Err(e) => return Err(e),
    };

    let checked = HandshakeRequest::parse(&buf[..len]).and_then(|request| {
        request.validate_upgrade()?;
        Ok(request)
    });
    let request = match checked {
        Ok(request) => request,
        Err(e) => {
            refuse(io, 400, "Bad Request").await?;
            return Err(match e {
                Error::UpgradeRejected(_) => e,
                other => Error::UpgradeRejected(other.to_string()),
            });
        }
    };
    if request.version() != Some(WS_VERSION) {
        refuse(io, 426, "Upgrade Required").await?;
        return Err(Error::UpgradeRejected(format!(
            "unsupported Sec-WebSocket-Version {:?}",
            request.version().unwrap_or_default()
        )));
    }

    let buffered = buf.split_off(len);
    Ok(Upgrade { request, buffered })
}
