//! The emulated device and its test handle.

use crate::state::*;
use ninalink_protocol::{Command, Frame, ERR_CMD, START_CMD};
use ninalink_spi::{Signal, Signals, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// A co-processor living in memory.
///
/// A transfer that starts with `START_CMD` is decoded and executed; its
/// reply is shifted out on the next transfer, which the host clocks with
/// filler. The busy line is never asserted.
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
    transfer_done: Arc<Signal>,
    pending: Vec<u8>,
    inbound: VecDeque<u8>,
    selected: bool,
}

impl SimDevice {
    /// Creates a device wired to `signals`, plus a handle for scripting it.
    pub fn new(signals: &Signals) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState::default()));
        let device = Self {
            state: Arc::clone(&state),
            transfer_done: Arc::clone(&signals.transfer_done),
            pending: Vec::new(),
            inbound: VecDeque::new(),
            selected: false,
        };
        (device, SimHandle { state })
    }

    fn execute(&mut self, tx: &[u8]) -> Vec<u8> {
        let frame = match Frame::decode_command(tx) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("sim: undecodable command: {}", e);
                return vec![ERR_CMD];
            }
        };

        let mut state = self.state.lock();
        let Some(reply) = state.handle(&frame) else {
            tracing::debug!("sim: rejected opcode {:#04x}", frame.opcode());
            return vec![ERR_CMD];
        };
        if let Some(lost) = frame
            .command_kind()
            .and_then(|command| state.lost_replies.get_mut(&command))
            .filter(|lost| **lost > 0)
        {
            *lost -= 1;
            tracing::debug!("sim: dropping reply to {:#04x}", frame.opcode());
            return Vec::new();
        }
        drop(state);

        match reply.encode() {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                tracing::warn!("sim: reply to {:#04x} does not fit: {}", frame.opcode(), e);
                vec![ERR_CMD]
            }
        }
    }
}

impl Transport for SimDevice {
    fn set_select(&mut self, selected: bool) {
        self.selected = selected;
    }

    fn set_reset(&mut self, high: bool) {
        if high {
            return;
        }
        let mut state = self.state.lock();
        state.resets += 1;
        state.sockets = std::array::from_fn(|_| SimSocket::default());
        self.pending.clear();
        tracing::trace!("sim: reset");
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn clear(&mut self) {
        self.inbound.clear();
    }

    fn start_transfer(&mut self, tx: &[u8]) {
        if !self.selected {
            tracing::warn!("sim: transfer without select");
        }
        if tx.first() == Some(&START_CMD) {
            self.pending = self.execute(tx);
            self.inbound = std::iter::repeat(0).take(tx.len()).collect();
        } else {
            self.inbound = self
                .pending
                .drain(..)
                .chain(std::iter::repeat(0))
                .take(tx.len())
                .collect();
        }
        self.transfer_done.give();
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.inbound.pop_front()
    }
}

/// Scripting and inspection access to a [`SimDevice`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.state.lock().connect = behavior;
    }

    pub fn set_close_behavior(&self, behavior: CloseBehavior) {
        self.state.lock().close = behavior;
    }

    /// Whether `DATA_SENT_TCP` reports delivery.
    pub fn set_send_confirmation(&self, confirm: bool) {
        self.state.lock().confirm_sends = confirm;
    }

    /// Caps how many bytes one `SEND_DATA_TCP` accepts.
    pub fn set_accept_limit(&self, limit: Option<usize>) {
        self.state.lock().accept_limit = limit;
    }

    /// Loops sent data back into the socket's receive queue.
    pub fn set_echo(&self, echo: bool) {
        self.state.lock().echo = echo;
    }

    /// Executes the next `count` `command`s but answers them with filler
    /// only, as if the reply were lost on the wire.
    pub fn lose_replies(&self, command: Command, count: u32) {
        self.state.lock().lost_replies.insert(command, count);
    }

    pub fn add_network(&self, network: SimNetwork) {
        self.state.lock().networks.push(network);
    }

    /// Number of `SCAN_NETWORKS` queries that come back empty after a scan
    /// starts.
    pub fn set_scan_latency(&self, polls: u32) {
        self.state.lock().scan_latency = polls;
    }

    /// Number of status queries that report idle after a join starts.
    pub fn set_join_latency(&self, polls: u32) {
        self.state.lock().join_latency = polls;
    }

    pub fn add_host(&self, host: &str, ip: Ipv4Addr) {
        self.state.lock().hosts.insert(host.to_string(), ip);
    }

    pub fn set_fw_version(&self, version: &str) {
        self.state.lock().fw_version = version.to_string();
    }

    /// Queues bytes as if the peer of `sock` had sent them.
    pub fn push_incoming(&self, sock: u8, data: &[u8]) {
        if let Some(socket) = self.state.lock().socket_mut(sock) {
            socket.rx.extend(data);
        }
    }

    /// Queues a datagram from `ip:port` on UDP socket `sock`.
    pub fn push_datagram(&self, sock: u8, ip: Ipv4Addr, port: u16, data: &[u8]) {
        if let Some(socket) = self.state.lock().socket_mut(sock) {
            socket.datagrams.push_back((ip, port, data.to_vec()));
        }
    }

    /// The peer of `sock` closes its side.
    pub fn close_remote(&self, sock: u8) {
        if let Some(socket) = self.state.lock().socket_mut(sock) {
            if socket.state == ESTABLISHED {
                socket.state = CLOSE_WAIT;
            }
        }
    }

    /// A peer at `remote` connects to the listener on `port` and sends
    /// `data`. Returns the new socket, or `255` if nothing is listening or
    /// no slot is free.
    pub fn inject_connection(&self, port: u16, remote: (Ipv4Addr, u16), data: &[u8]) -> u8 {
        let mut state = self.state.lock();
        let Some(listener) = state.sockets.iter().position(|s| {
            s.kind == SocketKind::Server && s.state == LISTEN && s.local_port == port
        }) else {
            return NO_SOCKET;
        };

        let sock = state.reserve_socket();
        if sock == NO_SOCKET {
            return NO_SOCKET;
        }
        let socket = &mut state.sockets[sock as usize];
        socket.kind = SocketKind::Client;
        socket.state = ESTABLISHED;
        socket.remote = Some(remote);
        socket.local_port = port;
        socket.rx.extend(data);
        state.sockets[listener].pending_accept.push_back(sock);
        sock
    }

    /// Everything the host sent on TCP socket `sock`.
    pub fn sent_data(&self, sock: u8) -> Vec<u8> {
        self.state
            .lock()
            .socket(sock)
            .map(|s| s.tx.clone())
            .unwrap_or_default()
    }

    /// Datagrams the host sent on UDP socket `sock`.
    pub fn sent_packets(&self, sock: u8) -> Vec<SentPacket> {
        self.state
            .lock()
            .socket(sock)
            .map(|s| s.packets.clone())
            .unwrap_or_default()
    }

    /// Raw TCP state of `sock`.
    pub fn socket_state(&self, sock: u8) -> u8 {
        self.state.lock().socket(sock).map_or(CLOSED, |s| s.state)
    }

    /// Whether slot `sock` is held by a socket.
    pub fn is_reserved(&self, sock: u8) -> bool {
        self.state.lock().socket(sock).is_some_and(|s| s.reserved)
    }

    /// How many times `command` has been received.
    pub fn command_count(&self, command: Command) -> usize {
        self.state.lock().counts.get(&command).copied().unwrap_or(0)
    }

    /// Times the reset line was driven low.
    pub fn reset_count(&self) -> usize {
        self.state.lock().resets
    }

    /// Mode and last written value of `pin`.
    pub fn pin(&self, pin: u8) -> Option<(u8, u8)> {
        self.state.lock().pins.get(&pin).copied()
    }

    pub fn hostname(&self) -> String {
        self.state.lock().hostname.clone()
    }

    pub fn dns(&self) -> [Ipv4Addr; 2] {
        self.state.lock().dns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ninalink_protocol::{ResponseParser, Slot};

    fn device() -> (SimDevice, SimHandle) {
        SimDevice::new(&Signals::new())
    }

    fn exchange(device: &mut SimDevice, frame: Frame) -> Vec<u8> {
        device.set_select(true);
        device.start_transfer(&frame.encode().unwrap());
        device.clear();
        device.start_transfer(&[0u8; 32]);
        device.set_select(false);
        std::iter::from_fn(|| device.read_byte()).collect()
    }

    #[test]
    fn test_reply_on_filler_transfer() {
        let (mut device, _sim) = device();
        let inbound = exchange(&mut device, Frame::command(Command::GetSocket));
        assert_eq!(inbound.len(), 32);

        let mut slots = [Slot::for_value(1)];
        let read = ResponseParser::for_command(Command::GetSocket)
            .parse(inbound, &mut slots)
            .unwrap();
        assert_eq!(read, 1);
        assert_eq!(slots[0].as_u8(), Some(0));
    }

    #[test]
    fn test_command_transfer_clocks_zeros() {
        let (mut device, _sim) = device();
        let frame = Frame::command(Command::GetFwVersion).encode().unwrap();
        device.start_transfer(&frame);
        let inbound: Vec<u8> = std::iter::from_fn(|| device.read_byte()).collect();
        assert_eq!(inbound, vec![0; frame.len()]);
    }

    #[test]
    fn test_garbage_gets_error_marker() {
        let (mut device, _sim) = device();
        device.start_transfer(&[START_CMD, 0x13, 0, 0xEE]);
        device.start_transfer(&[0u8; 4]);
        assert_eq!(device.read_byte(), Some(ERR_CMD));
    }

    #[test]
    fn test_lost_reply_still_executes() {
        let (mut device, sim) = device();
        sim.lose_replies(Command::GetSocket, 1);

        let inbound = exchange(&mut device, Frame::command(Command::GetSocket));
        assert!(inbound.iter().all(|&b| b == 0));
        assert!(sim.is_reserved(0));

        let inbound = exchange(&mut device, Frame::command(Command::GetSocket));
        assert_eq!(inbound.first(), Some(&START_CMD));
        assert_eq!(sim.command_count(Command::GetSocket), 2);
    }

    #[test]
    fn test_transfer_raises_done() {
        let signals = Signals::new();
        let (mut device, _sim) = SimDevice::new(&signals);
        device.start_transfer(&[0u8; 4]);
        assert!(signals.transfer_done.is_raised());
    }

    #[test]
    fn test_reset_clears_sockets() {
        let (mut device, sim) = device();
        exchange(&mut device, Frame::command(Command::GetSocket));
        assert!(sim.is_reserved(0));

        device.set_reset(false);
        device.set_reset(true);
        assert!(!sim.is_reserved(0));
        assert_eq!(sim.reset_count(), 1);
    }

    #[test]
    fn test_inject_connection() {
        let (mut device, sim) = device();
        let remote = (Ipv4Addr::new(10, 0, 0, 9), 40000);
        assert_eq!(sim.inject_connection(80, remote, b"hi"), NO_SOCKET);

        exchange(
            &mut device,
            Frame::command(Command::StartServerTcp)
                .with_u16(80)
                .with_u8(0)
                .with_u8(0),
        );
        let sock = sim.inject_connection(80, remote, b"hi");
        assert_eq!(sock, 1);
        assert_eq!(sim.socket_state(sock), ESTABLISHED);
        assert_eq!(sim.socket_state(0), LISTEN);
    }
}
