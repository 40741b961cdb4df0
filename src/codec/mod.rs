//! Byte-level I/O for one leg: the HTTP head before the upgrade, frames after.

mod framed;
mod head;

pub use framed::{FrameReader, FrameWriter};
pub use head::read_head;
