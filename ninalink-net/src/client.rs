//! TCP client socket.

use crate::error::NetError;
use crate::network::Network;
use crate::state::{ProtocolMode, SocketHandle, TcpState};
use ninalink_spi::Transport;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Largest payload one `SEND_DATA_TCP` or `INSERT_DATABUF` frame can carry.
///
/// Header (3) + socket param (2 + 1) + payload length (2), padded to a
/// multiple of four with END, must stay within the frame limit.
pub const MAX_SEND_CHUNK: usize = 243;

/// A client connection on the co-processor.
///
/// Write failures are sticky: once a write fails, [`write_error`]
/// (TcpClient::write_error) stays set until cleared.
pub struct TcpClient<T: Transport> {
    net: Arc<Network<T>>,
    sock: SocketHandle,
    write_error: bool,
}

impl<T: Transport> TcpClient<T> {
    /// Creates an unconnected client.
    pub fn new(net: Arc<Network<T>>) -> Self {
        Self::from_handle(net, SocketHandle::NO_SOCKET)
    }

    pub(crate) fn from_handle(net: Arc<Network<T>>, sock: SocketHandle) -> Self {
        Self {
            net,
            sock,
            write_error: false,
        }
    }

    pub fn socket(&self) -> SocketHandle {
        self.sock
    }

    /// Connects over plain TCP.
    pub fn connect(&mut self, ip: Ipv4Addr, port: u16) -> Result<(), NetError> {
        self.connect_with_mode(ip, port, ProtocolMode::Tcp)
    }

    pub fn connect_with_mode(
        &mut self,
        ip: Ipv4Addr,
        port: u16,
        mode: ProtocolMode,
    ) -> Result<(), NetError> {
        self.release();
        self.sock = self.net.try_connect(ip, port, mode)?;
        Ok(())
    }

    /// Connects by hostname, resolved on the device.
    pub fn connect_host(&mut self, host: &str, port: u16) -> Result<(), NetError> {
        self.release();
        self.sock = self.net.try_connect_host(host, port, ProtocolMode::Tcp)?;
        Ok(())
    }

    /// Opens a TLS session; the device handles the handshake.
    pub fn connect_tls(&mut self, host: &str, port: u16) -> Result<(), NetError> {
        self.release();
        self.sock = self.net.try_connect_host(host, port, ProtocolMode::Tls)?;
        Ok(())
    }

    fn release(&mut self) {
        let sock = self.sock;
        if sock.is_valid() {
            if let Err(e) = self.stop() {
                tracing::debug!("{}: stop before reconnect failed: {}", sock, e);
            }
        }
    }

    /// Sends up to [`MAX_SEND_CHUNK`] bytes of `data`.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<usize, NetError> {
        self.net.write(self.sock, data).inspect_err(|_| {
            self.write_error = true;
        })
    }

    pub fn write_error(&self) -> bool {
        self.write_error
    }

    pub fn clear_write_error(&mut self) {
        self.write_error = false;
    }

    pub fn available(&self) -> usize {
        self.net.available(self.sock)
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        self.net.read(self.sock, buf)
    }

    pub fn peek(&self) -> Option<u8> {
        self.net.peek(self.sock)
    }

    /// Whether the connection is alive or still has unread data.
    ///
    /// Drops the handle once the device reports the socket gone.
    pub fn connected(&mut self) -> bool {
        let connected = self.net.connected(self.sock);
        if !connected {
            self.sock = SocketHandle::NO_SOCKET;
        }
        connected
    }

    pub fn status(&self) -> TcpState {
        self.net.status(self.sock)
    }

    /// Closes the connection. The handle is dropped even if the device
    /// never confirms.
    pub fn stop(&mut self) -> Result<(), NetError> {
        if !self.sock.is_valid() {
            return Ok(());
        }
        let result = self.net.try_stop(self.sock);
        self.sock = SocketHandle::NO_SOCKET;
        result
    }

    pub fn remote_ip(&self) -> Option<Ipv4Addr> {
        self.net.remote(self.sock).map(|(ip, _)| ip)
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.net.remote(self.sock).map(|(_, port)| port)
    }
}

impl<T: Transport> io::Read for TcpClient<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.read_bytes(buf);
        if n > 0 {
            return Ok(n);
        }
        if self.connected() {
            Err(io::ErrorKind::WouldBlock.into())
        } else {
            Ok(0)
        }
    }
}

impl<T: Transport> io::Write for TcpClient<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.write_bytes(buf).map_err(|e| match e {
            NetError::InvalidSocket => io::Error::new(io::ErrorKind::NotConnected, e),
            other => io::Error::other(other),
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketConfig;
    use ninalink_protocol::{Command, Frame, ProtocolError, MAX_FRAME_SIZE};
    use ninalink_sim::SimDevice;
    use ninalink_spi::{LinkConfig, Signals, SpiDriver};
    use std::io::{Read, Write};
    use std::time::Duration;

    fn network() -> (Arc<Network<SimDevice>>, ninalink_sim::SimHandle) {
        let signals = Signals::new();
        let (device, sim) = SimDevice::new(&signals);
        let spi = Arc::new(SpiDriver::new(device, signals, LinkConfig::instant()));
        let config = SocketConfig::default().with_poll_interval(Duration::from_millis(1));
        (Arc::new(Network::new(spi, config)), sim)
    }

    #[test]
    fn test_send_chunk_fits_one_frame() {
        let fits = Frame::command(Command::SendDataTcp)
            .with_u8(0)
            .with_param(vec![0u8; MAX_SEND_CHUNK]);
        assert!(fits.encoded_len() <= MAX_FRAME_SIZE);
        assert!(fits.encode().is_ok());

        let too_big = Frame::command(Command::SendDataTcp)
            .with_u8(0)
            .with_param(vec![0u8; MAX_SEND_CHUNK + 1]);
        assert!(matches!(
            too_big.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_write_without_socket_is_sticky_error() {
        let (net, _sim) = network();
        let mut client = TcpClient::new(net);

        assert_eq!(client.write_bytes(b"x"), Err(NetError::InvalidSocket));
        assert!(client.write_error());

        let err = client.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        client.clear_write_error();
        assert!(!client.write_error());
    }

    #[test]
    fn test_connect_write_read() {
        let (net, sim) = network();
        let mut client = TcpClient::new(net);
        client.connect(Ipv4Addr::new(10, 0, 0, 5), 80).unwrap();
        assert!(client.socket().is_valid());
        assert_eq!(client.status(), TcpState::Established);

        client.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(
            sim.sent_data(client.socket().raw()),
            b"GET / HTTP/1.0\r\n\r\n".to_vec()
        );

        sim.push_incoming(client.socket().raw(), b"HTTP/1.0 200 OK\r\n");
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"HTTP/1.0 200 OK\r\n");

        let err = client.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_long_write_is_chunked() {
        let (net, sim) = network();
        let mut client = TcpClient::new(net);
        client.connect(Ipv4Addr::new(10, 0, 0, 5), 80).unwrap();

        let payload: Vec<u8> = (0..600).map(|i| (i % 256) as u8).collect();
        assert_eq!(client.write(&payload).unwrap(), MAX_SEND_CHUNK);
        client.write_all(&payload[MAX_SEND_CHUNK..]).unwrap();

        assert_eq!(sim.sent_data(client.socket().raw()), payload);
        assert_eq!(sim.command_count(Command::SendDataTcp), 3);
    }

    #[test]
    fn test_eof_after_peer_close() {
        let (net, sim) = network();
        let mut client = TcpClient::new(net);
        client.connect(Ipv4Addr::new(10, 0, 0, 5), 80).unwrap();
        let sock = client.socket();

        sim.push_incoming(sock.raw(), b"bye");
        sim.close_remote(sock.raw());

        let mut out = Vec::new();
        client.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"bye");
        assert_eq!(client.socket(), SocketHandle::NO_SOCKET);
    }

    #[test]
    fn test_stop_drops_handle() {
        let (net, _sim) = network();
        let mut client = TcpClient::new(Arc::clone(&net));
        client.connect(Ipv4Addr::new(10, 0, 0, 5), 80).unwrap();
        let sock = client.socket();

        client.stop().unwrap();
        assert_eq!(client.socket(), SocketHandle::NO_SOCKET);
        assert!(!net.is_buffered(sock));
        assert!(client.stop().is_ok());
    }
}
