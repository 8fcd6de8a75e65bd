//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer too short for the fixed layout being decoded
    #[error("malformed {what}: need {needed} bytes, have {available}")]
    Malformed {
        /// Which structure was being decoded
        what: &'static str,
        /// Bytes required by the layout
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// A name field that is not valid UTF-8 or violates the width limit
    #[error("invalid name field: {0}")]
    Name(&'static str),

    /// Unknown request code
    #[error("unknown request code {0}")]
    RequestCode(u16),

    /// Unknown response code
    #[error("unknown response code {0}")]
    ResponseCode(u16),

    /// Unknown message type
    #[error("unknown message type {0}")]
    MessageType(u8),

    /// A field does not match its fixed wire width
    #[error("encode error: {field} is {actual} bytes, expected {expected}")]
    Encode {
        /// Field being encoded
        field: &'static str,
        /// Width required by the protocol
        expected: usize,
        /// Width actually supplied
        actual: usize,
    },

    /// A variable-length section does not fit its 32-bit size field
    #[error("size limit exceeded: {0}")]
    Size(usize),
}

impl WireError {
    pub(crate) fn short(what: &'static str, needed: usize, available: usize) -> Self {
        WireError::Malformed {
            what,
            needed,
            available,
        }
    }
}
