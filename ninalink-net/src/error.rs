//! Socket and station error types.

use crate::state::SocketHandle;
use ninalink_protocol::Command;
use ninalink_spi::LinkError;
use thiserror::Error;

/// Errors surfaced by the socket and WiFi layers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("no socket available")]
    NoSocketAvailable,

    #[error("invalid socket handle")]
    InvalidSocket,

    #[error("empty payload")]
    EmptyPayload,

    #[error("device rejected {0}")]
    Rejected(Command),

    #[error("no reply to {0}")]
    NoReply(Command),

    #[error("{sock} not connected after {attempts} polls")]
    ConnectTimeout { sock: SocketHandle, attempts: u32 },

    #[error("{sock}: device accepted no bytes")]
    SendRejected { sock: SocketHandle },

    #[error("{sock}: delivery not confirmed after {attempts} polls")]
    SendUnconfirmed { sock: SocketHandle, attempts: u32 },

    #[error("{sock} not closed after {attempts} polls")]
    CloseTimeout { sock: SocketHandle, attempts: u32 },

    #[error("host not found: {0}")]
    HostNotFound(String),
}

impl NetError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Link(e) => e.is_retryable(),
            NetError::NoSocketAvailable => true,
            NetError::NoReply(_) => true,
            NetError::ConnectTimeout { .. } => true,
            NetError::SendUnconfirmed { .. } => true,
            NetError::CloseTimeout { .. } => true,
            _ => false,
        }
    }
}
