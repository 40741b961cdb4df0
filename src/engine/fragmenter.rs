//! Splitting outgoing messages into frames.

use crate::protocol::frame::RsvBits;
use crate::protocol::{Frame, OpCode};

/// Iterator over the frames of one encoded message.
///
/// The first frame carries the message opcode and the extension bits; the
/// rest are continuations with clear reserved bits.
pub struct MessageFragmenter<'a> {
    payload: &'a [u8],
    opcode: OpCode,
    rsv: RsvBits,
    fragment_size: usize,
    offset: usize,
    is_first: bool,
}

impl<'a> MessageFragmenter<'a> {
    /// Fragment `payload` into frames of at most `fragment_size` bytes.
    #[inline]
    #[must_use]
    pub fn new(payload: &'a [u8], opcode: OpCode, rsv: RsvBits, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode,
            rsv,
            fragment_size: fragment_size.max(1),
            offset: 0,
            is_first: true,
        }
    }

    /// More than one frame will be produced.
    #[inline]
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.payload.len() > self.fragment_size
    }
}

impl Iterator for MessageFragmenter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.payload.len() && !(self.is_first && self.payload.is_empty()) {
            return None;
        }

        let chunk_size = (self.payload.len() - self.offset).min(self.fragment_size);
        let chunk = self.payload[self.offset..self.offset + chunk_size].to_vec();
        self.offset += chunk_size;
        let fin = self.offset >= self.payload.len();

        if self.is_first {
            self.is_first = false;
            let mut first = Frame::new(fin, self.opcode, chunk);
            first.rsv = self.rsv;
            Some(first)
        } else {
            Some(Frame::new(fin, OpCode::Continuation, chunk))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_fragmentation_needed() {
        let frag = MessageFragmenter::new(b"Hello", OpCode::Text, RsvBits::NONE, 1024);
        assert!(!frag.needs_fragmentation());

        let frames: Vec<_> = frag.collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[0].payload, b"Hello");
    }

    #[test]
    fn test_rsv_only_on_first_fragment() {
        let payload = vec![0xAB; 25];
        let frames: Vec<_> =
            MessageFragmenter::new(&payload, OpCode::Binary, RsvBits::RSV1, 10).collect();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        assert_eq!(frames[0].rsv, RsvBits::RSV1);
        assert!(!frames[0].fin);

        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert!(frames[1].rsv.is_empty());
        assert!(!frames[1].fin);

        assert_eq!(frames[2].opcode, OpCode::Continuation);
        assert!(frames[2].rsv.is_empty());
        assert!(frames[2].fin);
        assert_eq!(frames[2].payload.len(), 5);
    }

    #[test]
    fn test_exact_multiple() {
        let payload = vec![0xCD; 30];
        let frag = MessageFragmenter::new(&payload, OpCode::Binary, RsvBits::NONE, 10);
        assert!(frag.needs_fragmentation());
        let frames: Vec<_> = frag.collect();
        assert_eq!(frames.len(), 3);
        assert!(frames[2].fin);
    }

    #[test]
    fn test_empty_payload() {
        let frames: Vec<_> = MessageFragmenter::new(b"", OpCode::Text, RsvBits::NONE, 1024).collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_payload_equals_fragment_size() {
        let payload = vec![0xEF; 100];
        let frag = MessageFragmenter::new(&payload, OpCode::Binary, RsvBits::NONE, 100);
        assert!(!frag.needs_fragmentation());
        assert_eq!(frag.count(), 1);
    }
}
