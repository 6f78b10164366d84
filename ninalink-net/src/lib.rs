//! # ninalink-net
//!
//! Sockets and station control on top of the ninalink framing engine.
//!
//! This crate provides:
//! - A per-socket receive cache that batches device reads
//! - The socket command set and the polling lifecycle built on it
//! - `TcpClient`, `TcpListener` and `UdpSocket` wrappers
//! - The WiFi command set with scan and join polling
//! - Aggregate configuration

pub mod buffer;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod network;
pub mod server;
pub mod state;
pub mod udp;
pub mod wifi;

pub use buffer::{SocketBuffers, SocketData};
pub use client::TcpClient;
pub use commands::ServerDrv;
pub use config::{Config, ConfigError, SocketConfig, WifiConfig};
pub use error::NetError;
pub use network::Network;
pub use server::TcpListener;
pub use state::{EncryptionType, ProtocolMode, SocketHandle, TcpState, WlStatus, MAX_SOCKETS};
pub use udp::UdpSocket;
pub use wifi::{PingError, ScanEntry, WifiDriver};
