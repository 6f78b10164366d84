//! # ninalink-sim
//!
//! An emulated co-processor for exercising the ninalink stack without
//! hardware.
//!
//! This crate provides:
//! - [`SimDevice`], a [`Transport`](ninalink_spi::Transport) that decodes
//!   command frames and answers them on the next filler transfer
//! - [`SimHandle`], for scripting behaviour and inspecting what the host sent
//! - An in-memory socket table, network list and host table

pub mod device;
mod dispatch;
pub mod state;

pub use device::{SimDevice, SimHandle};
pub use state::{CloseBehavior, ConnectBehavior, SentPacket, SimNetwork};
