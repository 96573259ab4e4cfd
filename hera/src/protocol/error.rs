use bytes::Bytes;
use std::{borrow::Cow, fmt};

use super::Opcode;
use crate::ext::FmtExt;

/// Message of the error raised when the server closes the stream mid frame.
pub const UNEXPECTED_EOF: &str = "Unexpected end of stream";

/// An error when the peer violates the wire protocol.
///
/// Any protocol error leaves the stream in an unknown position, the connection
/// must be discarded.
pub enum ProtocolError {
    /// Malformed length prefix, missing terminator or truncated stream.
    Framing(Cow<'static, str>),
    /// Response opcode is not one the current operation can accept.
    Unexpected {
        context: &'static str,
        opcode: Opcode,
        payload: Bytes,
    },
    /// Row terminated before all of its columns were received.
    MalformedRow {
        expected: usize,
        got: usize,
    },
    /// Payload that should be a decimal number is not.
    InvalidNumber {
        context: &'static str,
        payload: Bytes,
    },
}

impl ProtocolError {
    pub(crate) fn framing(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Framing(reason.into())
    }

    pub(crate) fn eof() -> Self {
        Self::Framing(UNEXPECTED_EOF.into())
    }

    pub(crate) fn unexpected(context: &'static str, opcode: Opcode, payload: Bytes) -> Self {
        Self::Unexpected { context, opcode, payload }
    }

    pub(crate) fn invalid_number(context: &'static str, payload: Bytes) -> Self {
        Self::InvalidNumber { context, payload }
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Framing(reason) => write!(f, "protocol framing error: {reason}"),
            Self::Unexpected { context, opcode, payload } => write!(
                f,
                "unexpected response for {context}: cmd={opcode}, data={}",
                payload.lossy()
            ),
            Self::MalformedRow { expected, got } => write!(
                f,
                "malformed row: expected {expected} columns, received {got}"
            ),
            Self::InvalidNumber { context, payload } => write!(
                f,
                "invalid number for {context}: {:?}",
                payload.lossy()
            ),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
