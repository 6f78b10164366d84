//! # ninalink-protocol
//!
//! Wire protocol spoken between a host and a WiFi co-processor over SPI.
//!
//! This crate provides:
//! - The command opcode table
//! - Command/reply frame encoding with 4-byte alignment padding
//! - Byte-at-a-time response parsing into caller-provided slots
//! - Protocol error types and constants

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;

pub use codec::{ResponseParser, Slot};
pub use command::Command;
pub use error::ProtocolError;
pub use frame::{Frame, ParamWidth};

/// Marks the first byte of every frame.
pub const START_CMD: u8 = 0xE0;

/// Marks the last byte of every frame.
pub const END_CMD: u8 = 0xEE;

/// Sent by the device in place of a frame when it rejects a command.
pub const ERR_CMD: u8 = 0xEF;

/// Set on the opcode byte of every reply.
pub const REPLY_FLAG: u8 = 0x80;

/// Filler value for parameters the device ignores.
pub const DUMMY_DATA: u8 = 0xFF;

/// Single-byte acknowledgement value.
pub const SPI_ACK: u8 = 1;

/// Largest frame either side may clock in one transaction.
pub const MAX_FRAME_SIZE: usize = 255;

/// Number of bytes scanned for a start marker before giving up.
pub const START_MARKER_BUDGET: usize = 1000;
