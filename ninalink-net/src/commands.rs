//! Socket command set.
//!
//! Each method is one request/reply transaction. Polling and retries live
//! in [`crate::network`].

use crate::buffer::SocketData;
use crate::state::{ProtocolMode, SocketHandle, TcpState};
use ninalink_protocol::{Command, Frame, Slot, SPI_ACK};
use ninalink_spi::{LinkError, SpiDriver, Transport};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Runs `frame` and returns how many reply parameters landed in `slots`.
pub(crate) fn call<T: Transport>(
    spi: &SpiDriver<T>,
    frame: &Frame,
    slots: &mut [Slot],
) -> Result<usize, LinkError> {
    Ok(spi.request(frame, slots)?.params_read())
}

/// Runs `frame` and checks for a single acknowledgement byte.
pub(crate) fn ack<T: Transport>(spi: &SpiDriver<T>, frame: &Frame) -> Result<bool, LinkError> {
    Ok(read_u8(spi, frame)? == Some(SPI_ACK))
}

pub(crate) fn read_u8<T: Transport>(
    spi: &SpiDriver<T>,
    frame: &Frame,
) -> Result<Option<u8>, LinkError> {
    let mut slots = [Slot::for_value(1)];
    let read = call(spi, frame, &mut slots)?;
    Ok(if read == 0 { None } else { slots[0].as_u8() })
}

/// Reads a device-native (little-endian) 16-bit result.
pub(crate) fn read_le16<T: Transport>(
    spi: &SpiDriver<T>,
    frame: &Frame,
) -> Result<Option<u16>, LinkError> {
    let mut slots = [Slot::for_value(2)];
    let read = call(spi, frame, &mut slots)?;
    Ok(if read == 0 { None } else { slots[0].as_u16_le() })
}

/// Reads a device-native (little-endian) 32-bit result.
pub(crate) fn read_le32<T: Transport>(
    spi: &SpiDriver<T>,
    frame: &Frame,
) -> Result<Option<u32>, LinkError> {
    let mut slots = [Slot::for_value(4)];
    let read = call(spi, frame, &mut slots)?;
    Ok(if read == 0 { None } else { slots[0].as_u32_le() })
}

pub(crate) fn slot_ipv4(slot: &Slot) -> Option<Ipv4Addr> {
    slot.as_u32().map(Ipv4Addr::from)
}

/// Socket-level commands.
pub struct ServerDrv<T: Transport> {
    spi: Arc<SpiDriver<T>>,
}

impl<T: Transport> Clone for ServerDrv<T> {
    fn clone(&self) -> Self {
        Self {
            spi: Arc::clone(&self.spi),
        }
    }
}

impl<T: Transport> ServerDrv<T> {
    pub fn new(spi: Arc<SpiDriver<T>>) -> Self {
        Self { spi }
    }

    pub fn spi(&self) -> &Arc<SpiDriver<T>> {
        &self.spi
    }

    /// Asks the device for a free socket.
    pub fn get_socket(&self) -> Result<SocketHandle, LinkError> {
        let raw = read_u8(&self.spi, &Frame::command(Command::GetSocket))?;
        Ok(raw.map(SocketHandle::new).unwrap_or(SocketHandle::NO_SOCKET))
    }

    /// Starts listening on `port`.
    pub fn start_server(
        &self,
        port: u16,
        sock: SocketHandle,
        mode: ProtocolMode,
    ) -> Result<bool, LinkError> {
        let frame = Frame::command(Command::StartServerTcp)
            .with_u16(port)
            .with_u8(sock.raw())
            .with_u8(mode.raw());
        ack(&self.spi, &frame)
    }

    /// Starts listening on `port` bound to `addr` (multicast groups).
    pub fn start_server_bind(
        &self,
        addr: Ipv4Addr,
        port: u16,
        sock: SocketHandle,
        mode: ProtocolMode,
    ) -> Result<bool, LinkError> {
        let frame = Frame::command(Command::StartServerTcp)
            .with_ipv4(addr)
            .with_u16(port)
            .with_u8(sock.raw())
            .with_u8(mode.raw());
        ack(&self.spi, &frame)
    }

    /// Opens a connection to `ip:port`.
    pub fn start_client(
        &self,
        ip: Ipv4Addr,
        port: u16,
        sock: SocketHandle,
        mode: ProtocolMode,
    ) -> Result<bool, LinkError> {
        let frame = Frame::command(Command::StartClientTcp)
            .with_ipv4(ip)
            .with_u16(port)
            .with_u8(sock.raw())
            .with_u8(mode.raw());
        ack(&self.spi, &frame)
    }

    /// Opens a connection to `host`, resolved on the device.
    pub fn start_client_host(
        &self,
        host: &str,
        ip: Ipv4Addr,
        port: u16,
        sock: SocketHandle,
        mode: ProtocolMode,
    ) -> Result<bool, LinkError> {
        let frame = Frame::command(Command::StartClientTcp)
            .with_param(host.as_bytes().to_vec())
            .with_ipv4(ip)
            .with_u16(port)
            .with_u8(sock.raw())
            .with_u8(mode.raw());
        ack(&self.spi, &frame)
    }

    pub fn stop_client(&self, sock: SocketHandle) -> Result<bool, LinkError> {
        ack(
            &self.spi,
            &Frame::command(Command::StopClientTcp).with_u8(sock.raw()),
        )
    }

    /// State of a listening socket.
    pub fn server_state(&self, sock: SocketHandle) -> Result<TcpState, LinkError> {
        self.state(Command::GetStateTcp, sock)
    }

    /// State of a client socket.
    pub fn client_state(&self, sock: SocketHandle) -> Result<TcpState, LinkError> {
        self.state(Command::GetClientStateTcp, sock)
    }

    fn state(&self, command: Command, sock: SocketHandle) -> Result<TcpState, LinkError> {
        let raw = read_u8(&self.spi, &Frame::command(command).with_u8(sock.raw()))?;
        Ok(match raw.map(|raw| (raw, TcpState::from_raw(raw))) {
            Some((_, Some(state))) => state,
            Some((raw, None)) => {
                tracing::warn!("{}: unknown tcp state {}", sock, raw);
                TcpState::Closed
            }
            None => TcpState::Closed,
        })
    }

    /// Bytes waiting on the device for `sock`.
    pub fn avail_data(&self, sock: SocketHandle) -> Result<u16, LinkError> {
        let frame = Frame::command(Command::AvailDataTcp).with_u8(sock.raw());
        Ok(read_le16(&self.spi, &frame)?.unwrap_or(0))
    }

    /// Socket of a client waiting on listening socket `sock`.
    pub fn avail_server(&self, sock: SocketHandle) -> Result<SocketHandle, LinkError> {
        let frame = Frame::command(Command::AvailDataTcp).with_u8(sock.raw());
        Ok(read_le16(&self.spi, &frame)?
            .and_then(|raw| u8::try_from(raw).ok())
            .map(SocketHandle::new)
            .unwrap_or(SocketHandle::NO_SOCKET))
    }

    /// Reads (or peeks) a single byte.
    pub fn get_data(&self, sock: SocketHandle, peek: bool) -> Result<Option<u8>, LinkError> {
        let frame = Frame::command(Command::GetDataTcp)
            .with_u8(sock.raw())
            .with_u8(peek as u8);
        read_u8(&self.spi, &frame)
    }

    /// Pulls up to `slot.capacity() - 1` buffered bytes into `slot`.
    pub fn get_data_buf(&self, sock: SocketHandle, slot: &mut Slot) -> Result<usize, LinkError> {
        let want = slot.capacity().saturating_sub(1).min(u16::MAX as usize) as u16;
        let frame = Frame::command(Command::GetDatabufTcp)
            .with_u8(sock.raw())
            .with_u16(want);
        let read = call(&self.spi, &frame, std::slice::from_mut(slot))?;
        Ok(if read == 0 { 0 } else { slot.len() })
    }

    /// Appends to the pending UDP datagram.
    pub fn insert_data_buf(&self, sock: SocketHandle, data: &[u8]) -> Result<bool, LinkError> {
        let frame = Frame::command(Command::InsertDatabuf)
            .with_u8(sock.raw())
            .with_param(data.to_vec());
        ack(&self.spi, &frame)
    }

    /// Sends the pending UDP datagram.
    pub fn send_udp_data(&self, sock: SocketHandle) -> Result<bool, LinkError> {
        ack(
            &self.spi,
            &Frame::command(Command::SendDataUdp).with_u8(sock.raw()),
        )
    }

    /// Hands `data` to the device; returns how many bytes it accepted.
    pub fn send_data(&self, sock: SocketHandle, data: &[u8]) -> Result<u16, LinkError> {
        let frame = Frame::command(Command::SendDataTcp)
            .with_u8(sock.raw())
            .with_param(data.to_vec());
        Ok(read_le16(&self.spi, &frame)?.unwrap_or(0))
    }

    /// Whether the device has flushed everything sent on `sock`.
    pub fn check_data_sent(&self, sock: SocketHandle) -> Result<bool, LinkError> {
        let frame = Frame::command(Command::DataSentTcp).with_u8(sock.raw());
        Ok(read_u8(&self.spi, &frame)?.is_some_and(|sent| sent != 0))
    }

    /// Remote address and port of `sock`.
    pub fn remote_data(&self, sock: SocketHandle) -> Result<Option<(Ipv4Addr, u16)>, LinkError> {
        let frame = Frame::command(Command::GetRemoteData).with_u8(sock.raw());
        let mut slots = [Slot::for_value(4), Slot::for_value(2)];
        if call(&self.spi, &frame, &mut slots)? < 2 {
            return Ok(None);
        }
        Ok(slot_ipv4(&slots[0]).zip(slots[1].as_u16()))
    }
}

impl<T: Transport> SocketData for ServerDrv<T> {
    fn fetch(&self, sock: SocketHandle, slot: &mut Slot) -> usize {
        self.get_data_buf(sock, slot).unwrap_or_else(|e| {
            tracing::warn!("{}: buffered read failed: {}", sock, e);
            0
        })
    }
}
