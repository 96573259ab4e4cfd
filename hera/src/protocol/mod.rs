//! Proxy wire protocol.
pub mod opcode;
pub mod frame;
mod error;

pub use opcode::{BATCH, BindType, Opcode};
pub use frame::{Frame, FrameReader, FrameWriter};
pub use error::{ProtocolError, UNEXPECTED_EOF};
