//! Listening sockets.

use crate::client::TcpClient;
use crate::error::NetError;
use crate::network::Network;
use crate::state::{ProtocolMode, SocketHandle, TcpState};
use ninalink_spi::Transport;
use std::sync::Arc;

/// A TCP listener on the co-processor.
pub struct TcpListener<T: Transport> {
    net: Arc<Network<T>>,
    sock: SocketHandle,
    port: u16,
}

impl<T: Transport> TcpListener<T> {
    /// Starts listening on `port`.
    pub fn bind(net: Arc<Network<T>>, port: u16) -> Result<Self, NetError> {
        let sock = net.start_server(port, ProtocolMode::Tcp)?;
        Ok(Self { net, sock, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket(&self) -> SocketHandle {
        self.sock
    }

    pub fn status(&self) -> TcpState {
        self.net.server_status(self.sock)
    }

    pub fn is_listening(&self) -> bool {
        self.status() == TcpState::Listen
    }

    /// Returns the next waiting client, if any. Never blocks.
    pub fn accept(&self) -> Option<TcpClient<T>> {
        let client = self.net.accept(self.sock);
        if !client.is_valid() {
            return None;
        }
        tracing::info!("{}: accepted {}", self.sock, client);
        Some(TcpClient::from_handle(Arc::clone(&self.net), client))
    }

    /// Stops listening.
    pub fn close(self) -> Result<(), NetError> {
        self.net.try_stop(self.sock)
    }
}
