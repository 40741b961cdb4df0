//! Reassembly of fragmented data messages.

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::frame::RsvBits;
use crate::protocol::{Frame, OpCode};

/// Collects data frames until a final fragment completes the message.
///
/// Text payloads are not UTF-8 checked here: a compressed message is only
/// meaningful after the extension decoders ran, so the engine checks the
/// decoded payload instead.
#[derive(Debug)]
pub struct MessageAssembler {
    limits: Limits,
    current: Option<(OpCode, RsvBits)>,
    buffer: Vec<u8>,
    fragment_count: usize,
}

impl MessageAssembler {
    /// Assembler enforcing `limits`.
    #[must_use]
    pub const fn new(limits: Limits) -> Self {
        Self {
            limits,
            current: None,
            buffer: Vec::new(),
            fragment_count: 0,
        }
    }

    /// Add a data frame; returns the message once its final fragment arrives.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation with nothing to
    ///   continue, or a new message while one is still open
    /// - `Error::TooManyFragments` / `Error::MessageTooLarge` from the limits
    pub fn push(&mut self, frame: Frame) -> Result<Option<AssembledMessage>> {
        match (frame.opcode, self.current) {
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "continuation frame without a message in progress".into(),
                ));
            }
            (OpCode::Continuation, Some(_)) => {}
            (op, None) if op.is_data() => self.current = Some((op, frame.rsv)),
            (op, Some(_)) if op.is_data() => {
                return Err(Error::ProtocolViolation(format!(
                    "{op} frame while a fragmented message is in progress"
                )));
            }
            (op, _) => {
                return Err(Error::ProtocolViolation(format!(
                    "{op} frame passed to the message assembler"
                )));
            }
        }

        self.fragment_count += 1;
        self.limits.check_fragment_count(self.fragment_count)?;
        self.limits
            .check_message_size(self.buffer.len() + frame.payload.len())?;

        if frame.fin && self.buffer.is_empty() {
            // Single frame message: hand over the payload without copying.
            let (opcode, rsv) = self.finish();
            return Ok(Some(AssembledMessage {
                opcode,
                rsv,
                payload: frame.payload,
            }));
        }

        self.buffer.extend_from_slice(&frame.payload);
        if frame.fin {
            let payload = std::mem::take(&mut self.buffer);
            let (opcode, rsv) = self.finish();
            Ok(Some(AssembledMessage {
                opcode,
                rsv,
                payload,
            }))
        } else {
            Ok(None)
        }
    }

    /// A fragmented message is in progress.
    #[must_use]
    pub const fn is_assembling(&self) -> bool {
        self.current.is_some()
    }

    fn finish(&mut self) -> (OpCode, RsvBits) {
        self.fragment_count = 0;
        self.current.take().unwrap_or((OpCode::Binary, RsvBits::NONE))
    }
}

/// A complete data message, still in its on-the-wire (possibly compressed)
/// form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// `Text` or `Binary`.
    pub opcode: OpCode,
    /// Reserved bits of the first frame.
    pub rsv: RsvBits,
    /// Concatenated payload.
    pub payload: Vec<u8>,
}
