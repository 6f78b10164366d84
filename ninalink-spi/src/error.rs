//! Link error types.

use ninalink_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while running a transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("device not ready after {0:?}")]
    DeviceNotReady(Duration),

    #[error("invalid link configuration: {0}")]
    InvalidConfig(String),
}

impl LinkError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Protocol(e) => e.is_retryable(),
            LinkError::DeviceNotReady(_) => true,
            LinkError::InvalidConfig(_) => false,
        }
    }
}
