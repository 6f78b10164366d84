//! # ninalink-spi
//!
//! Framing engine for the ninalink co-processor link.
//!
//! This crate provides:
//! - The [`Transport`] adapter trait the engine drives
//! - Binary notification [`Signal`]s for the ready and transfer-complete lines
//! - [`SpiDriver`], which serializes every transaction behind one lock
//! - Link timing configuration

pub mod config;
pub mod engine;
pub mod error;
pub mod signal;
pub mod transport;

pub use config::LinkConfig;
pub use engine::{Reply, Session, SpiDriver};
pub use error::LinkError;
pub use signal::Signal;
pub use transport::{Signals, Transport};
