//! UDP sockets.
//!
//! Outgoing datagrams are assembled on the device: `begin_packet` sets the
//! destination, `write` appends, `end_packet` sends.

use crate::client::MAX_SEND_CHUNK;
use crate::error::NetError;
use crate::network::Network;
use crate::state::{ProtocolMode, SocketHandle};
use ninalink_protocol::Command;
use ninalink_spi::Transport;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub struct UdpSocket<T: Transport> {
    net: Arc<Network<T>>,
    sock: SocketHandle,
    port: u16,
}

impl<T: Transport> UdpSocket<T> {
    /// Binds a UDP socket to local `port`.
    pub fn bind(net: Arc<Network<T>>, port: u16) -> Result<Self, NetError> {
        let sock = net.start_server(port, ProtocolMode::Udp)?;
        Ok(Self { net, sock, port })
    }

    /// Binds to `port` and joins multicast `group`.
    pub fn bind_multicast(
        net: Arc<Network<T>>,
        group: Ipv4Addr,
        port: u16,
    ) -> Result<Self, NetError> {
        let sock = net.start_server_bind(group, port, ProtocolMode::UdpMulticast)?;
        Ok(Self { net, sock, port })
    }

    pub fn socket(&self) -> SocketHandle {
        self.sock
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Starts a datagram to `ip:port`.
    pub fn begin_packet(&mut self, ip: Ipv4Addr, port: u16) -> Result<(), NetError> {
        let drv = self.net.server_drv();
        if !drv.start_client(ip, port, self.sock, ProtocolMode::Udp)? {
            return Err(NetError::Rejected(Command::StartClientTcp));
        }
        Ok(())
    }

    /// Starts a datagram to `host:port`, resolved on the device.
    pub fn begin_packet_host(&mut self, host: &str, port: u16) -> Result<(), NetError> {
        let drv = self.net.server_drv();
        if !drv.start_client_host(host, Ipv4Addr::UNSPECIFIED, port, self.sock, ProtocolMode::Udp)? {
            return Err(NetError::Rejected(Command::StartClientTcp));
        }
        Ok(())
    }

    /// Appends `data` to the datagram being built.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, NetError> {
        let drv = self.net.server_drv();
        for chunk in data.chunks(MAX_SEND_CHUNK) {
            if !drv.insert_data_buf(self.sock, chunk)? {
                return Err(NetError::Rejected(Command::InsertDatabuf));
            }
        }
        Ok(data.len())
    }

    /// Sends the datagram.
    pub fn end_packet(&mut self) -> Result<(), NetError> {
        if !self.net.server_drv().send_udp_data(self.sock)? {
            return Err(NetError::Rejected(Command::SendDataUdp));
        }
        Ok(())
    }

    /// Size of the next received datagram's readable bytes, `0` if none.
    pub fn parse_packet(&mut self) -> usize {
        self.net.available(self.sock)
    }

    pub fn available(&self) -> usize {
        self.net.available(self.sock)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        self.net.read(self.sock, buf)
    }

    pub fn peek(&self) -> Option<u8> {
        self.net.peek(self.sock)
    }

    /// Sender of the last received datagram.
    pub fn remote(&self) -> Option<(Ipv4Addr, u16)> {
        self.net.remote(self.sock)
    }

    /// Releases the socket.
    pub fn close(self) -> Result<(), NetError> {
        self.net.try_stop(self.sock)
    }
}
