//! Command handlers.
//!
//! Each handler reads its parameters, updates [`SimState`] and builds the
//! reply frame. A handler returning `None` makes the device answer with
//! `ERR_CMD`.

use crate::state::*;
use bytes::Bytes;
use ninalink_protocol::{Command, Frame, MAX_FRAME_SIZE};
use std::net::Ipv4Addr;

/// Typed access to a decoded command's parameters.
struct Params<'a>(&'a [Bytes]);

impl<'a> Params<'a> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn bytes(&self, index: usize) -> Option<&'a [u8]> {
        self.0.get(index).map(|b| b.as_ref())
    }

    fn u8(&self, index: usize) -> Option<u8> {
        match self.bytes(index)? {
            [b] => Some(*b),
            _ => None,
        }
    }

    fn u16(&self, index: usize) -> Option<u16> {
        match self.bytes(index)? {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    fn ipv4(&self, index: usize) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = self.bytes(index)?.try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }

    fn text(&self, index: usize) -> Option<String> {
        String::from_utf8(self.bytes(index)?.to_vec()).ok()
    }
}

fn ack(command: Command, ok: bool) -> Frame {
    Frame::reply(command).with_u8(ok as u8)
}

fn is_udp(mode: u8) -> bool {
    mode == MODE_UDP || mode == MODE_UDP_MULTICAST
}

impl SimState {
    /// Runs one command and returns the reply to queue.
    pub(crate) fn handle(&mut self, frame: &Frame) -> Option<Frame> {
        let command = frame.command_kind()?;
        *self.counts.entry(command).or_default() += 1;
        tracing::trace!("sim <- {} ({} params)", command, frame.params().len());

        let p = Params(frame.params());
        let reply = Frame::reply(command);
        Some(match command {
            Command::GetSocket => reply.with_u8(self.reserve_socket()),
            Command::StartServerTcp => ack(command, self.start_server(&p)?),
            Command::StartClientTcp => ack(command, self.start_client(&p)?),
            Command::StopClientTcp => ack(command, self.stop(p.u8(0)?)),
            Command::GetStateTcp | Command::GetClientStateTcp => {
                let state = self.socket(p.u8(0)?).map_or(CLOSED, |s| s.state);
                reply.with_u8(state)
            }
            Command::DataSentTcp => reply.with_u8(self.confirm_sends as u8),
            Command::AvailDataTcp => reply.with_u16_le(self.avail(p.u8(0)?)),
            Command::GetDataTcp => {
                let socket = self.socket_mut(p.u8(0)?)?;
                socket.load_datagram();
                let byte = if p.u8(1)? != 0 {
                    socket.rx.front().copied()
                } else {
                    socket.rx.pop_front()
                };
                match byte {
                    Some(b) => reply.with_u8(b),
                    None => reply,
                }
            }
            Command::GetDatabufTcp => {
                let want = p.u16(1)? as usize;
                let socket = self.socket_mut(p.u8(0)?)?;
                socket.load_datagram();
                let n = want.min(socket.rx.len()).min(DATABUF_REPLY_MAX);
                if n == 0 {
                    reply
                } else {
                    reply.with_param(socket.rx.drain(..n).collect::<Vec<u8>>())
                }
            }
            Command::SendDataTcp => reply.with_u16_le(self.send_tcp(p.u8(0)?, p.bytes(1)?)),
            Command::InsertDatabuf => {
                let socket = self.socket_mut(p.u8(0)?)?;
                socket.staged.extend_from_slice(p.bytes(1)?);
                ack(command, true)
            }
            Command::SendDataUdp => ack(command, self.send_udp(p.u8(0)?)),
            Command::GetRemoteData => match self.socket(p.u8(0)?)?.remote {
                Some((ip, port)) => reply.with_ipv4(ip).with_u16(port),
                None => reply,
            },

            Command::SetNet => {
                self.join(&p.text(0)?, None);
                ack(command, true)
            }
            Command::SetPassphrase => {
                self.join(&p.text(0)?, Some(p.bytes(1)?));
                ack(command, true)
            }
            Command::SetKey => {
                self.join(&p.text(0)?, Some(p.bytes(2)?));
                ack(command, true)
            }
            Command::SetApNet => {
                self.start_ap(&p.text(0)?, p.u8(1)?, None);
                ack(command, true)
            }
            Command::SetApPassphrase => {
                self.start_ap(&p.text(0)?, p.u8(2)?, Some(p.bytes(1)?));
                ack(command, true)
            }
            Command::SetIpConfig => {
                let valid = p.u8(0)?;
                if valid >= 1 {
                    self.ip = p.ipv4(1)?;
                }
                if valid >= 2 {
                    self.gateway = p.ipv4(2)?;
                }
                if valid >= 3 {
                    self.subnet = p.ipv4(3)?;
                }
                ack(command, true)
            }
            Command::SetDnsConfig => {
                let valid = p.u8(0)?;
                if valid >= 1 {
                    self.dns[0] = p.ipv4(1)?;
                }
                if valid >= 2 {
                    self.dns[1] = p.ipv4(2)?;
                }
                ack(command, true)
            }
            Command::SetHostname => {
                self.hostname = p.text(0)?;
                ack(command, true)
            }
            Command::SetPowerMode => {
                self.low_power = p.u8(0)? != 0;
                ack(command, true)
            }
            Command::SetDebug => {
                self.debug = p.u8(0)? != 0;
                ack(command, true)
            }
            Command::Disconnect => {
                self.disconnect();
                ack(command, true)
            }

            Command::GetConnStatus => reply.with_u8(self.poll_status()),
            Command::GetIpAddr => reply
                .with_ipv4(self.ip)
                .with_ipv4(self.subnet)
                .with_ipv4(self.gateway),
            Command::GetMacAddr => reply.with_param(self.mac.to_vec()),
            Command::GetCurrSsid => {
                let ssid = self.link.network.as_ref().map(|n| n.ssid.clone());
                reply.with_param(ssid.unwrap_or_default().into_bytes())
            }
            Command::GetCurrBssid => {
                let bssid = self.link.network.as_ref().map_or([0; 6], |n| n.bssid);
                reply.with_param(bssid.to_vec())
            }
            Command::GetCurrRssi => {
                let rssi = self.link.network.as_ref().map_or(0, |n| n.rssi);
                reply.with_u32_le(rssi as u32)
            }
            Command::GetCurrEnct => {
                reply.with_u8(self.link.network.as_ref().map_or(0, |n| n.encryption))
            }

            Command::StartScanNetworks => {
                self.scan_pending = self.scan_latency;
                ack(command, true)
            }
            Command::ScanNetworks => self.scan_results(reply),
            Command::GetIdxRssi => match self.networks.get(p.u8(0)? as usize) {
                Some(n) => reply.with_u32_le(n.rssi as u32),
                None => reply,
            },
            Command::GetIdxEnct => match self.networks.get(p.u8(0)? as usize) {
                Some(n) => reply.with_u8(n.encryption),
                None => reply,
            },
            Command::GetIdxBssid => match self.networks.get(p.u8(0)? as usize) {
                Some(n) => reply.with_param(n.bssid.to_vec()),
                None => reply,
            },
            Command::GetIdxChannel => match self.networks.get(p.u8(0)? as usize) {
                Some(n) => reply.with_u8(n.channel),
                None => reply,
            },

            Command::ReqHostByName => {
                self.last_lookup = self.resolve(&p.text(0)?);
                ack(command, self.last_lookup.is_some())
            }
            Command::GetHostByName => {
                reply.with_ipv4(self.last_lookup.unwrap_or(Ipv4Addr::BROADCAST))
            }
            Command::GetFwVersion => reply.with_param(self.fw_version.clone().into_bytes()),
            Command::GetTime => reply.with_u32_le(self.time),
            Command::GetTemperature => reply.with_u32_le(self.temperature.to_bits()),
            Command::Ping => {
                let ip = p.ipv4(0)?;
                let code: i16 = if ip.is_unspecified() {
                    -1
                } else if p.u8(1)? == 0 {
                    -2
                } else {
                    12
                };
                reply.with_u16_le(code as u16)
            }

            Command::SetPinMode => {
                self.pins.entry(p.u8(0)?).or_default().0 = p.u8(1)?;
                ack(command, true)
            }
            Command::SetDigitalWrite | Command::SetAnalogWrite => {
                self.pins.entry(p.u8(0)?).or_default().1 = p.u8(1)?;
                ack(command, true)
            }
        })
    }

    /// `[port, sock, mode]`, optionally led by a bind address.
    fn start_server(&mut self, p: &Params<'_>) -> Option<bool> {
        let offset = match p.len() {
            3 => 0,
            4 => 1,
            _ => return None,
        };
        let port = p.u16(offset)?;
        let mode = p.u8(offset + 2)?;
        let Some(socket) = self.socket_mut(p.u8(offset + 1)?) else {
            return Some(false);
        };

        socket.reserved = true;
        socket.mode = mode;
        socket.local_port = port;
        if is_udp(mode) {
            socket.kind = SocketKind::Udp;
            socket.state = CLOSED;
        } else {
            socket.kind = SocketKind::Server;
            socket.state = LISTEN;
        }
        Some(true)
    }

    /// `[ip, port, sock, mode]`, optionally led by a hostname.
    fn start_client(&mut self, p: &Params<'_>) -> Option<bool> {
        let (host, offset) = match p.len() {
            4 => (None, 0),
            5 => (Some(p.text(0)?), 1),
            _ => return None,
        };
        let mut ip = p.ipv4(offset)?;
        let port = p.u16(offset + 1)?;
        let sock = p.u8(offset + 2)?;
        let mode = p.u8(offset + 3)?;

        if let Some(host) = host {
            match self.resolve(&host) {
                Some(resolved) => ip = resolved,
                None => {
                    tracing::debug!("sim: cannot resolve {}", host);
                    return Some(false);
                }
            }
        }

        let behavior = self.connect;
        let Some(socket) = self.socket_mut(sock) else {
            return Some(false);
        };

        if is_udp(mode) {
            socket.reserved = true;
            socket.kind = SocketKind::Udp;
            socket.mode = mode;
            socket.dest = Some((ip, port));
            return Some(true);
        }

        let state = match behavior {
            ConnectBehavior::Establish => ESTABLISHED,
            ConnectBehavior::StuckSynSent => SYN_SENT,
            ConnectBehavior::Refuse => return Some(false),
        };
        *socket = SimSocket {
            reserved: true,
            kind: SocketKind::Client,
            state,
            mode,
            remote: Some((ip, port)),
            ..Default::default()
        };
        Some(true)
    }

    fn stop(&mut self, sock: u8) -> bool {
        if self.socket(sock).is_none() {
            return false;
        }
        match self.close {
            CloseBehavior::Immediate => self.release_socket(sock),
            CloseBehavior::Linger => {
                if let Some(socket) = self.socket_mut(sock) {
                    socket.state = FIN_WAIT_1;
                }
            }
        }
        true
    }

    /// Pending client on a listener, byte count on anything else.
    fn avail(&mut self, sock: u8) -> u16 {
        let Some(socket) = self.socket_mut(sock) else {
            return 0;
        };
        match socket.kind {
            SocketKind::Server => socket
                .pending_accept
                .pop_front()
                .unwrap_or(NO_SOCKET)
                .into(),
            _ => {
                socket.load_datagram();
                socket.rx.len().min(u16::MAX as usize) as u16
            }
        }
    }

    fn send_tcp(&mut self, sock: u8, data: &[u8]) -> u16 {
        let limit = self.accept_limit.unwrap_or(usize::MAX);
        let echo = self.echo;
        let Some(socket) = self.socket_mut(sock) else {
            return 0;
        };
        if socket.kind != SocketKind::Client || socket.state != ESTABLISHED {
            return 0;
        }

        let accepted = &data[..data.len().min(limit)];
        socket.tx.extend_from_slice(accepted);
        if echo {
            socket.rx.extend(accepted);
        }
        accepted.len() as u16
    }

    fn send_udp(&mut self, sock: u8) -> bool {
        let echo = self.echo;
        let Some(socket) = self.socket_mut(sock) else {
            return false;
        };
        let data = std::mem::take(&mut socket.staged);
        if echo {
            if let Some((ip, port)) = socket.dest {
                socket.datagrams.push_back((ip, port, data.clone()));
            }
        }
        socket.packets.push(SentPacket {
            dest: socket.dest,
            data,
        });
        true
    }

    /// As many SSIDs as fit one reply frame.
    fn scan_results(&mut self, mut reply: Frame) -> Frame {
        if self.scan_pending > 0 {
            self.scan_pending -= 1;
            return reply;
        }
        for network in self.networks.iter().take(SOCKET_COUNT) {
            let next = reply.clone().with_param(network.ssid.clone().into_bytes());
            if next.encoded_len() > MAX_FRAME_SIZE {
                break;
            }
            reply = next;
        }
        reply
    }
}
