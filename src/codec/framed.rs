use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::engine::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;
use crate::protocol::mask::MaskGenerator;
use crate::protocol::{Frame, FrameValidator};

/// Reads frames from the receiving half of a leg's transport.
///
/// Each header is validated as soon as it is complete, so an oversized or
/// malformed frame is rejected before its payload is buffered.
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    validator: FrameValidator,
    read_size: usize,
}

impl<R> FrameReader<R> {
    /// Reader starting with `buffered`, bytes already read past the
    /// handshake head.
    #[must_use]
    pub fn new(io: R, validator: FrameValidator, buffered: BytesMut, read_size: usize) -> Self {
        Self {
            io,
            buf: buffered,
            validator,
            read_size: read_size.max(64),
        }
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Next frame, unmasked. `Ok(None)` when the peer closed the transport
    /// cleanly between frames.
    ///
    /// # Errors
    ///
    /// Validation errors from [`FrameValidator`], parse errors from
    /// [`FrameHeader::parse`], `Error::Transport` on I/O failure or EOF in
    /// the middle of a frame.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match FrameHeader::parse(&self.buf) {
                Ok(header) => {
                    self.validator.validate(&header)?;
                    let total = header.frame_len()?;
                    if self.buf.len() >= total {
                        let frame = Frame::from_parts(&header, &self.buf[header.header_len..total]);
                        self.buf.advance(total);
                        return Ok(Some(frame));
                    }
                    self.buf.reserve(total - self.buf.len());
                }
                Err(Error::IncompleteFrame { .. }) => {
                    if self.buf.capacity() == self.buf.len() {
                        self.buf.reserve(self.read_size);
                    }
                }
                Err(e) => return Err(e),
            }

            if self.io.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Transport(format!(
                    "connection closed with {} bytes of a partial frame",
                    self.buf.len()
                )));
            }
        }
    }
}

/// Writes frames to the sending half of a leg's transport, masking them
/// when the leg is a client.
pub struct FrameWriter<W> {
    io: W,
    buf: BytesMut,
    masks: Option<MaskGenerator>,
}

impl<W> FrameWriter<W> {
    /// Writer for a leg playing `role`.
    #[must_use]
    pub fn new(io: W, role: Role, capacity: usize) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(capacity),
            masks: role.must_mask().then(MaskGenerator::new),
        }
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Write one frame. Not flushed.
    ///
    /// # Errors
    ///
    /// `Error::Transport` on I/O failure or if no masking key is available.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mask = match self.masks.as_mut() {
            Some(masks) => Some(masks.next_key()?),
            None => None,
        };
        self.buf.clear();
        frame.write_to(&mut self.buf, mask);
        self.io.write_all(&self.buf).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// `Error::Transport` on I/O failure.
    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    /// Flush and half-close the transport.
    ///
    /// # Errors
    ///
    /// `Error::Transport` on I/O failure.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
