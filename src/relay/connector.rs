//! Opening the backend transport.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Connect to the backend once, with no retry.
///
/// # Errors
///
/// `Error::BackendConnect` if the connection is refused, fails, or does not
/// complete within `timeout`.
pub async fn connect(addr: &str, timeout: Option<Duration>) -> Result<TcpStream> {
    let failed = |reason: String| Error::BackendConnect {
        addr: addr.to_string(),
        reason,
    };

    let attempt = TcpStream::connect(addr);
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| failed(format!("timed out after {limit:?}")))?,
        None => attempt.await,
    }
    .map_err(|e| failed(e.to_string()))?;

    stream.set_nodelay(true).map_err(|e| failed(e.to_string()))?;
    Ok(stream)
}
