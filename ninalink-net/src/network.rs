//! Socket lifecycle.
//!
//! The device never pushes state changes, so opening and closing a socket
//! are bounded polling loops over the status query. The `try_*` methods
//! report why something failed; their plain counterparts flatten failures
//! into the sentinel handle, `0`, or `false`.

use crate::buffer::SocketBuffers;
use crate::client::MAX_SEND_CHUNK;
use crate::commands::ServerDrv;
use crate::config::SocketConfig;
use crate::error::NetError;
use crate::state::{ProtocolMode, SocketHandle, TcpState};
use ninalink_protocol::Command;
use ninalink_spi::{SpiDriver, Transport};
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Owner of the socket receive cache and the polling budgets.
pub struct Network<T: Transport> {
    drv: ServerDrv<T>,
    buffers: Mutex<SocketBuffers>,
    config: SocketConfig,
}

impl<T: Transport> Network<T> {
    pub fn new(spi: Arc<SpiDriver<T>>, config: SocketConfig) -> Self {
        Self {
            drv: ServerDrv::new(spi),
            buffers: Mutex::new(SocketBuffers::new(config.buffer_size)),
            config,
        }
    }

    pub fn server_drv(&self) -> &ServerDrv<T> {
        &self.drv
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Asks the device for a free socket; the sentinel if none is left.
    pub fn get_socket(&self) -> SocketHandle {
        self.drv.get_socket().unwrap_or_else(|e| {
            tracing::warn!("socket request failed: {}", e);
            SocketHandle::NO_SOCKET
        })
    }

    fn acquire(&self) -> Result<SocketHandle, NetError> {
        let sock = self.drv.get_socket()?;
        if sock.is_valid() {
            Ok(sock)
        } else {
            Err(NetError::NoSocketAvailable)
        }
    }

    /// Opens a client socket to `ip:port` and waits for it to connect.
    pub fn try_connect(
        &self,
        ip: Ipv4Addr,
        port: u16,
        mode: ProtocolMode,
    ) -> Result<SocketHandle, NetError> {
        let sock = self.acquire()?;
        tracing::debug!("{}: connecting to {}:{} ({:?})", sock, ip, port, mode);
        if !self.drv.start_client(ip, port, sock, mode)? {
            return Err(NetError::Rejected(Command::StartClientTcp));
        }
        self.await_connected(sock)
    }

    /// Opens a client socket to `host:port`, letting the device resolve it.
    pub fn try_connect_host(
        &self,
        host: &str,
        port: u16,
        mode: ProtocolMode,
    ) -> Result<SocketHandle, NetError> {
        let sock = self.acquire()?;
        tracing::debug!("{}: connecting to {}:{} ({:?})", sock, host, port, mode);
        if !self
            .drv
            .start_client_host(host, Ipv4Addr::UNSPECIFIED, port, sock, mode)?
        {
            return Err(NetError::Rejected(Command::StartClientTcp));
        }
        self.await_connected(sock)
    }

    /// [`try_connect`](Self::try_connect), returning the sentinel on failure.
    pub fn connect(&self, ip: Ipv4Addr, port: u16, mode: ProtocolMode) -> SocketHandle {
        or_sentinel(self.try_connect(ip, port, mode))
    }

    /// [`try_connect_host`](Self::try_connect_host), returning the sentinel
    /// on failure.
    pub fn connect_hostname(&self, host: &str, port: u16, mode: ProtocolMode) -> SocketHandle {
        or_sentinel(self.try_connect_host(host, port, mode))
    }

    /// Opens a TLS session to `host:port`.
    pub fn connect_tls(&self, host: &str, port: u16) -> SocketHandle {
        self.connect_hostname(host, port, ProtocolMode::Tls)
    }

    fn await_connected(&self, sock: SocketHandle) -> Result<SocketHandle, NetError> {
        let attempts = self.config.connect_attempts;
        for attempt in 1..=attempts {
            match self.drv.client_state(sock) {
                Ok(state) if state.is_connected() => {
                    tracing::info!("{} connected after {} polls", sock, attempt);
                    return Ok(sock);
                }
                Ok(state) => tracing::trace!("{}: {:?}", sock, state),
                Err(e) => tracing::debug!("{}: state query failed: {}", sock, e),
            }
            if attempt < attempts {
                std::thread::sleep(self.config.connect_interval());
            }
        }

        tracing::warn!("{} not connected after {} polls", sock, attempts);
        self.buffers.lock().close(sock);
        Err(NetError::ConnectTimeout { sock, attempts })
    }

    /// Starts a listening socket on `port`.
    pub fn start_server(&self, port: u16, mode: ProtocolMode) -> Result<SocketHandle, NetError> {
        let sock = self.acquire()?;
        if !self.drv.start_server(port, sock, mode)? {
            return Err(NetError::Rejected(Command::StartServerTcp));
        }
        tracing::info!("{} listening on port {} ({:?})", sock, port, mode);
        Ok(sock)
    }

    /// Starts a listening socket on `addr:port`.
    pub fn start_server_bind(
        &self,
        addr: Ipv4Addr,
        port: u16,
        mode: ProtocolMode,
    ) -> Result<SocketHandle, NetError> {
        let sock = self.acquire()?;
        if !self.drv.start_server_bind(addr, port, sock, mode)? {
            return Err(NetError::Rejected(Command::StartServerTcp));
        }
        tracing::info!("{} listening on {}:{} ({:?})", sock, addr, port, mode);
        Ok(sock)
    }

    /// Takes the next client waiting on listening socket `sock`.
    pub fn accept(&self, sock: SocketHandle) -> SocketHandle {
        if !sock.is_valid() {
            return SocketHandle::NO_SOCKET;
        }
        self.drv.avail_server(sock).unwrap_or_else(|e| {
            tracing::debug!("{}: accept query failed: {}", sock, e);
            SocketHandle::NO_SOCKET
        })
    }

    /// Sends up to [`MAX_SEND_CHUNK`] bytes of `data` and waits for the
    /// device to confirm delivery.
    ///
    /// Returns the number of bytes the device accepted.
    pub fn write(&self, sock: SocketHandle, data: &[u8]) -> Result<usize, NetError> {
        if !sock.is_valid() {
            return Err(NetError::InvalidSocket);
        }
        if data.is_empty() {
            return Err(NetError::EmptyPayload);
        }

        let chunk = &data[..data.len().min(MAX_SEND_CHUNK)];
        let accepted = self.drv.send_data(sock, chunk)?;
        if accepted == 0 {
            tracing::warn!("{}: device accepted none of {} bytes", sock, chunk.len());
            return Err(NetError::SendRejected { sock });
        }

        let attempts = self.config.send_confirm_attempts;
        for attempt in 1..=attempts {
            match self.drv.check_data_sent(sock) {
                Ok(true) => return Ok(accepted as usize),
                Ok(false) => {}
                Err(e) => tracing::debug!("{}: send confirmation failed: {}", sock, e),
            }
            if attempt < attempts {
                std::thread::sleep(self.config.send_confirm_interval());
            }
        }

        tracing::warn!("{}: delivery not confirmed after {} polls", sock, attempts);
        Err(NetError::SendUnconfirmed { sock, attempts })
    }

    /// Bytes ready to read from the receive cache.
    pub fn available(&self, sock: SocketHandle) -> usize {
        self.buffers.lock().available(sock, &self.drv)
    }

    pub fn read(&self, sock: SocketHandle, buf: &mut [u8]) -> usize {
        self.buffers.lock().read(sock, &self.drv, buf)
    }

    pub fn peek(&self, sock: SocketHandle) -> Option<u8> {
        self.buffers.lock().peek(sock, &self.drv)
    }

    /// Client socket state; `CLOSED` when it cannot be read.
    pub fn status(&self, sock: SocketHandle) -> TcpState {
        if !sock.is_valid() {
            return TcpState::Closed;
        }
        self.drv.client_state(sock).unwrap_or(TcpState::Closed)
    }

    /// Listening socket state; `CLOSED` when it cannot be read.
    pub fn server_status(&self, sock: SocketHandle) -> TcpState {
        if !sock.is_valid() {
            return TcpState::Closed;
        }
        self.drv.server_state(sock).unwrap_or(TcpState::Closed)
    }

    /// Whether `sock` has unread data or a live connection.
    ///
    /// A socket found not connected has its receive buffer freed.
    pub fn connected(&self, sock: SocketHandle) -> bool {
        if !sock.is_valid() {
            return false;
        }
        if self.available(sock) > 0 {
            return true;
        }
        if self.status(sock).is_connected() {
            return true;
        }
        self.buffers.lock().close(sock);
        false
    }

    /// Remote address and port of `sock`.
    pub fn remote(&self, sock: SocketHandle) -> Option<(Ipv4Addr, u16)> {
        if !sock.is_valid() {
            return None;
        }
        self.drv.remote_data(sock).ok().flatten()
    }

    /// Closes `sock` and waits for the device to report it closed.
    ///
    /// The receive buffer is freed whatever the outcome.
    pub fn try_stop(&self, sock: SocketHandle) -> Result<(), NetError> {
        if !sock.is_valid() {
            return Err(NetError::InvalidSocket);
        }
        let result = self.stop_and_wait(sock);
        self.buffers.lock().close(sock);
        result
    }

    /// [`try_stop`](Self::try_stop), reporting only whether the close was
    /// confirmed.
    pub fn stop(&self, sock: SocketHandle) -> bool {
        match self.try_stop(sock) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("stop failed: {}", e);
                false
            }
        }
    }

    fn stop_and_wait(&self, sock: SocketHandle) -> Result<(), NetError> {
        if let Err(e) = self.drv.stop_client(sock) {
            tracing::debug!("{}: stop request failed: {}", sock, e);
        }

        let attempts = self.config.stop_attempts;
        for attempt in 1..=attempts {
            match self.drv.client_state(sock) {
                Ok(TcpState::Closed) => {
                    tracing::info!("{} closed", sock);
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("{}: state query failed: {}", sock, e),
            }
            if attempt < attempts {
                std::thread::sleep(self.config.stop_interval());
            }
        }
        Err(NetError::CloseTimeout { sock, attempts })
    }

    /// Frees every receive buffer.
    pub fn close_all(&self) {
        self.buffers.lock().close_all();
    }

    /// Whether `sock` currently holds a receive buffer.
    pub fn is_buffered(&self, sock: SocketHandle) -> bool {
        self.buffers.lock().is_allocated(sock)
    }
}

fn or_sentinel(result: Result<SocketHandle, NetError>) -> SocketHandle {
    result.unwrap_or_else(|e| {
        tracing::warn!("connect failed: {}", e);
        SocketHandle::NO_SOCKET
    })
}
