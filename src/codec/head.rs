use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Read until `buf` holds a complete HTTP head.
///
/// Returns the length of the head including the blank line. Anything read
/// past it stays in `buf`: for a client leg those are the first frame bytes.
///
/// # Errors
///
/// - `Error::HandshakeTooLarge` if no head ends within `max` bytes
/// - `Error::ConnectionClosed` on EOF before the head is complete
/// - `Error::Transport` on I/O failure
pub async fn read_head<R>(io: &mut R, buf: &mut BytesMut, max: usize) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut searched = 0;
    loop {
        if let Some(pos) = buf[searched..]
            .windows(HEAD_END.len())
            .position(|w| w == HEAD_END)
        {
            let len = searched + pos + HEAD_END.len();
            if len > max {
                return Err(Error::HandshakeTooLarge { size: len, max });
            }
            return Ok(len);
        }
        if buf.len() > max {
            return Err(Error::HandshakeTooLarge {
                size: buf.len(),
                max,
            });
        }
        // The terminator may straddle two reads.
        searched = buf.len().saturating_sub(HEAD_END.len() - 1);

        buf.reserve(1024);
        if io.read_buf(buf).await? == 0 {
            return Err(Error::ConnectionClosed(None));
        }
    }
}
