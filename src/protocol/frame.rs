//! WebSocket frame parsing and serialization (RFC 6455 Section 5.2).

use std::fmt;
use std::ops::BitOr;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// The three reserved header bits, kept in their wire positions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RsvBits(u8);

impl RsvBits {
    /// No bits.
    pub const NONE: Self = Self(0);
    /// RSV1, used by permessage-deflate.
    pub const RSV1: Self = Self(0x40);
    /// RSV2.
    pub const RSV2: Self = Self(0x20);
    /// RSV3.
    pub const RSV3: Self = Self(0x10);

    /// Take the reserved bits out of a first header byte.
    #[inline]
    #[must_use]
    pub const fn from_header_byte(byte0: u8) -> Self {
        Self(byte0 & 0x70)
    }

    /// Raw bits in header position.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// No bit set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Every bit of `other` is also set here.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// At least one bit in common.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Bits set here but not in `other`.
    #[inline]
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for RsvBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for RsvBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RsvBits({}{}{})",
            u8::from(self.contains(Self::RSV1)),
            u8::from(self.contains(Self::RSV2)),
            u8::from(self.contains(Self::RSV3))
        )
    }
}

/// Decoded frame header, available before the payload has arrived.
///
/// Parsing the header alone lets the reader reject oversized, reserved or
/// wrongly-masked frames without buffering their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment of a message.
    pub fin: bool,
    /// Reserved bits as sent.
    pub rsv: RsvBits,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present on client-to-server frames.
    pub mask: Option<[u8; 4]>,
    /// Payload length declared by the header.
    pub payload_len: usize,
    /// Bytes taken by the header itself, including the mask key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse the header at the start of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if the header is not fully buffered
    /// - `Error::ReservedOpcode` for reserved opcodes
    /// - `Error::PayloadTooLargeForPlatform` if the 64-bit length does not fit `usize`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let (byte0, byte1) = match buf {
            [b0, b1, ..] => (*b0, *b1),
            _ => {
                return Err(Error::IncompleteFrame {
                    needed: 2 - buf.len(),
                });
            }
        };

        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = byte1 & 0x80 != 0;

        let (payload_len, len_end) = match byte1 & 0x7F {
            126 => {
                let ext = need(buf, 4)?;
                (usize::from(u16::from_be_bytes([ext[2], ext[3]])), 4)
            }
            127 => {
                let ext = need(buf, 10)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&ext[2..10]);
                let len = u64::from_be_bytes(raw);
                let len = usize::try_from(len).map_err(|_| Error::PayloadTooLargeForPlatform {
                    size: len,
                    max: usize::MAX as u64,
                })?;
                (len, 10)
            }
            short => (usize::from(short), 2),
        };

        let (mask, header_len) = if masked {
            let with_key = need(buf, len_end + 4)?;
            let mut key = [0u8; 4];
            key.copy_from_slice(&with_key[len_end..len_end + 4]);
            (Some(key), len_end + 4)
        } else {
            (None, len_end)
        };

        Ok(Self {
            fin: byte0 & 0x80 != 0,
            rsv: RsvBits::from_header_byte(byte0),
            opcode,
            mask,
            payload_len,
            header_len,
        })
    }

    /// Header plus payload length, or an error if that overflows.
    ///
    /// # Errors
    ///
    /// `Error::PayloadTooLargeForPlatform` on overflow.
    pub fn frame_len(&self) -> Result<usize> {
        self.header_len
            .checked_add(self.payload_len)
            .ok_or(Error::PayloadTooLargeForPlatform {
                size: self.payload_len as u64,
                max: (usize::MAX - self.header_len) as u64,
            })
    }
}

fn need(buf: &[u8], len: usize) -> Result<&[u8]> {
    if buf.len() < len {
        Err(Error::IncompleteFrame {
            needed: len - buf.len(),
        })
    } else {
        Ok(buf)
    }
}

/// A WebSocket frame with an unmasked payload.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                 Masking key (client frames only)              |
/// +---------------------------------------------------------------+
/// |                          Payload data                         |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bits; only extensions may set them.
    pub rsv: RsvBits,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame with no reserved bits.
    #[must_use]
    pub const fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv: RsvBits::NONE,
            opcode,
            payload,
        }
    }

    /// Final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Close frame; an absent code yields an empty payload.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = Vec::with_capacity(2 + reason.len());
                data.extend_from_slice(&code.to_be_bytes());
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Parse a complete frame from `buf`, unmasking the payload.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Any error of [`FrameHeader::parse`], or `Error::IncompleteFrame` if
    /// the payload is not fully buffered.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header.frame_len()?;
        need(buf, total)?;
        Ok((Self::from_parts(&header, &buf[header.header_len..total]), total))
    }

    /// Build a frame from a parsed header and its still-masked payload bytes.
    #[must_use]
    pub fn from_parts(header: &FrameHeader, raw_payload: &[u8]) -> Self {
        let mut payload = raw_payload.to_vec();
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }
        Self {
            fin: header.fin,
            rsv: header.rsv,
            opcode: header.opcode,
            payload,
        }
    }

    /// Append the wire form of this frame to `dst`, masking with `mask` if given.
    pub fn write_to(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        let len = self.payload.len();
        dst.reserve(self.wire_size(mask.is_some()));

        let mut byte0 = self.opcode.as_u8() | self.rsv.bits();
        if self.fin {
            byte0 |= 0x80;
        }
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        if len <= MAX_CONTROL_FRAME_PAYLOAD {
            dst.put_u8(mask_bit | len as u8);
        } else if let Ok(short) = u16::try_from(len) {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(short);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }

    /// Bytes needed to write this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let ext = if len <= MAX_CONTROL_FRAME_PAYLOAD {
            0
        } else if len <= usize::from(u16::MAX) {
            2
        } else {
            8
        };
        2 + ext + if masked { 4 } else { 0 } + len
    }
}
