//! Header-level checks applied to every incoming frame before its payload
//! is buffered.

use crate::config::Limits;
use crate::engine::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::{FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, RsvBits};
use crate::protocol::OpCode;

/// Validates incoming frame headers for one leg.
///
/// The reserved bits a leg may see depend on which extensions were
/// negotiated on that leg, so every leg owns its own validator.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
    accept_unmasked_frames: bool,
    allowed_rsv: RsvBits,
}

impl FrameValidator {
    /// Validator for frames received by `role`.
    #[must_use]
    pub const fn new(role: Role, limits: Limits) -> Self {
        Self {
            role,
            limits,
            accept_unmasked_frames: false,
            allowed_rsv: RsvBits::NONE,
        }
    }

    /// Accept unmasked frames from clients.
    #[must_use]
    pub const fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Reserved bits claimed by the negotiated extensions.
    #[must_use]
    pub const fn with_allowed_rsv(mut self, rsv: RsvBits) -> Self {
        self.allowed_rsv = rsv;
        self
    }

    /// Check a frame header.
    ///
    /// Order: masking, opcode-specific rules, reserved bits, size.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` / `Error::MaskedServerFrame`
    /// - `Error::FragmentedControlFrame` / `Error::ControlFrameTooLarge`
    /// - `Error::ReservedBitsSet` for bits no extension claimed, or any bit on
    ///   a control or continuation frame
    /// - `Error::FrameTooLarge`
    pub fn validate(&self, header: &FrameHeader) -> Result<()> {
        self.validate_masking(header.mask.is_some())?;

        if header.opcode.is_control() {
            if !header.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if header.payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(header.payload_len));
            }
        }

        // Extensions only flag the first frame of a data message.
        let allowed = if header.opcode.is_control() || header.opcode == OpCode::Continuation {
            RsvBits::NONE
        } else {
            self.allowed_rsv
        };
        if !header.rsv.difference(allowed).is_empty() {
            return Err(Error::ReservedBitsSet);
        }

        self.limits.check_frame_size(header.payload_len)
    }

    fn validate_masking(&self, masked: bool) -> Result<()> {
        match self.role {
            Role::Server if !masked && !self.accept_unmasked_frames => {
                Err(Error::UnmaskedClientFrame)
            }
            Role::Client if masked => Err(Error::MaskedServerFrame),
            _ => Ok(()),
        }
    }
}
