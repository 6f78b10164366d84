//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while building or parsing frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("parameter {index} too long for {width} encoding: {len} bytes")]
    ParamTooLong {
        index: usize,
        len: usize,
        width: &'static str,
    },

    #[error("too many parameters: {0} (max 255)")]
    TooManyParams(usize),

    #[error("no start marker within {budget} bytes")]
    MissingStart { budget: usize },

    #[error("device answered with an error marker")]
    DeviceError,

    #[error("unexpected reply opcode: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedReply { expected: u8, actual: u8 },

    #[error("missing end marker: got {actual:#04x}")]
    MissingEnd { actual: u8 },

    #[error("inbound stream ended mid-frame")]
    StreamExhausted,
}

impl ProtocolError {
    /// Returns whether the failure came from a desynchronized or garbled
    /// inbound stream, which a fresh transaction may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::MissingStart { .. }
                | ProtocolError::UnexpectedReply { .. }
                | ProtocolError::MissingEnd { .. }
                | ProtocolError::StreamExhausted
        )
    }
}
