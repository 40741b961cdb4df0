//! RFC 6455 wire format shared by both legs: frames, masking, validation,
//! reassembly, and the HTTP upgrade exchange.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod headers;
pub mod mask;
pub mod opcode;
pub mod validation;

pub use assembler::{AssembledMessage, MessageAssembler};
pub use frame::{Frame, RsvBits};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, OutboundRequest, WS_GUID, WS_VERSION, compute_accept_key,
};
pub use headers::HeaderMap;
pub use mask::apply_mask;
pub use opcode::OpCode;
pub use validation::FrameValidator;
