//! Emulated device state.

use ninalink_protocol::Command;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::Ipv4Addr;

/// Socket slots on the device.
pub const SOCKET_COUNT: usize = 10;

/// Returned in place of a socket number when none is free.
pub const NO_SOCKET: u8 = 255;

/// Largest GET_DATABUF payload whose reply still fits one frame.
pub const DATABUF_REPLY_MAX: usize = 246;

// Raw TCP states.
pub(crate) const CLOSED: u8 = 0;
pub(crate) const LISTEN: u8 = 1;
pub(crate) const SYN_SENT: u8 = 2;
pub(crate) const ESTABLISHED: u8 = 4;
pub(crate) const FIN_WAIT_1: u8 = 5;
pub(crate) const CLOSE_WAIT: u8 = 7;

// Raw link statuses.
pub(crate) const WL_IDLE: u8 = 0;
pub(crate) const WL_NO_SSID_AVAIL: u8 = 1;
pub(crate) const WL_CONNECTED: u8 = 3;
pub(crate) const WL_CONNECT_FAILED: u8 = 4;
pub(crate) const WL_DISCONNECTED: u8 = 6;
pub(crate) const WL_AP_LISTENING: u8 = 7;

// Raw encryption types.
pub(crate) const ENC_WEP: u8 = 5;
pub(crate) const ENC_CCMP: u8 = 4;
pub(crate) const ENC_NONE: u8 = 7;

// Protocol modes.
pub(crate) const MODE_UDP: u8 = 1;
pub(crate) const MODE_UDP_MULTICAST: u8 = 3;

/// What happens to a client socket after `START_CLIENT_TCP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    /// Goes straight to `ESTABLISHED`.
    #[default]
    Establish,
    /// Stays in `SYN_SENT` forever.
    StuckSynSent,
    /// The start command is not acknowledged.
    Refuse,
}

/// What happens to a socket after `STOP_CLIENT_TCP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseBehavior {
    /// Goes to `CLOSED` and the slot is released.
    #[default]
    Immediate,
    /// Stays in `FIN_WAIT_1` and keeps its slot.
    Linger,
}

/// An access point visible to scans and joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimNetwork {
    pub ssid: String,
    pub secret: Option<Vec<u8>>,
    pub encryption: u8,
    pub rssi: i32,
    pub bssid: [u8; 6],
    pub channel: u8,
}

impl SimNetwork {
    pub fn open(ssid: &str) -> Self {
        Self {
            ssid: ssid.to_string(),
            secret: None,
            encryption: ENC_NONE,
            rssi: -60,
            bssid: bssid_for(ssid),
            channel: 1,
        }
    }

    /// A WPA2 network joined with `passphrase`.
    pub fn secured(ssid: &str, passphrase: &str) -> Self {
        Self {
            secret: Some(passphrase.as_bytes().to_vec()),
            encryption: ENC_CCMP,
            ..Self::open(ssid)
        }
    }

    /// A WEP network joined with `key`.
    pub fn wep(ssid: &str, key: &[u8]) -> Self {
        Self {
            secret: Some(key.to_vec()),
            encryption: ENC_WEP,
            ..Self::open(ssid)
        }
    }

    pub fn with_rssi(mut self, rssi: i32) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    fn accepts(&self, secret: Option<&[u8]>) -> bool {
        self.secret.as_deref() == secret
    }
}

fn bssid_for(ssid: &str) -> [u8; 6] {
    let mut bssid = [0x02, 0, 0, 0, 0, 0];
    for (i, b) in ssid.bytes().enumerate() {
        bssid[1 + i % 5] ^= b;
    }
    bssid
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SocketKind {
    #[default]
    Unused,
    Client,
    Server,
    Udp,
}

/// A datagram sent by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub dest: Option<(Ipv4Addr, u16)>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct SimSocket {
    pub reserved: bool,
    pub kind: SocketKind,
    pub state: u8,
    pub mode: u8,
    pub local_port: u16,
    pub remote: Option<(Ipv4Addr, u16)>,
    pub dest: Option<(Ipv4Addr, u16)>,
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    pub staged: Vec<u8>,
    pub packets: Vec<SentPacket>,
    pub datagrams: VecDeque<(Ipv4Addr, u16, Vec<u8>)>,
    pub pending_accept: VecDeque<u8>,
}

impl SimSocket {
    /// Moves the next queued datagram into the receive queue once the
    /// current one is drained.
    pub fn load_datagram(&mut self) {
        if self.kind != SocketKind::Udp || !self.rx.is_empty() {
            return;
        }
        if let Some((ip, port, data)) = self.datagrams.pop_front() {
            self.remote = Some((ip, port));
            self.rx.extend(data);
        }
    }
}

/// Current station or AP link.
#[derive(Debug)]
pub(crate) struct LinkState {
    pub status: u8,
    pub pending_polls: u32,
    pub network: Option<SimNetwork>,
}

/// Everything the emulated device knows.
#[derive(Debug)]
pub(crate) struct SimState {
    pub sockets: [SimSocket; SOCKET_COUNT],
    pub connect: ConnectBehavior,
    pub close: CloseBehavior,
    pub confirm_sends: bool,
    pub accept_limit: Option<usize>,
    pub echo: bool,

    pub networks: Vec<SimNetwork>,
    pub scan_latency: u32,
    pub scan_pending: u32,
    pub join_latency: u32,
    pub link: LinkState,

    pub hosts: HashMap<String, Ipv4Addr>,
    pub last_lookup: Option<Ipv4Addr>,

    pub fw_version: String,
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: [Ipv4Addr; 2],
    pub hostname: String,
    pub time: u32,
    pub temperature: f32,
    pub low_power: bool,
    pub debug: bool,
    pub pins: BTreeMap<u8, (u8, u8)>,

    pub counts: HashMap<Command, usize>,
    pub resets: usize,
    /// Replies still to be swallowed, per command.
    pub lost_replies: HashMap<Command, u32>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            sockets: std::array::from_fn(|_| SimSocket::default()),
            connect: ConnectBehavior::default(),
            close: CloseBehavior::default(),
            confirm_sends: true,
            accept_limit: None,
            echo: false,
            networks: Vec::new(),
            scan_latency: 0,
            scan_pending: 0,
            join_latency: 0,
            link: LinkState {
                status: WL_IDLE,
                pending_polls: 0,
                network: None,
            },
            hosts: HashMap::new(),
            last_lookup: None,
            fw_version: "1.2.1".to_string(),
            mac: [0x24, 0x0a, 0xc4, 0x12, 0x34, 0x56],
            ip: Ipv4Addr::new(192, 168, 1, 100),
            subnet: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            dns: [Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::UNSPECIFIED],
            hostname: "nina".to_string(),
            time: 1_700_000_000,
            temperature: 42.5,
            low_power: false,
            debug: false,
            pins: BTreeMap::new(),
            counts: HashMap::new(),
            lost_replies: HashMap::new(),
            resets: 0,
        }
    }
}

impl SimState {
    pub fn socket(&self, sock: u8) -> Option<&SimSocket> {
        self.sockets.get(sock as usize)
    }

    pub fn socket_mut(&mut self, sock: u8) -> Option<&mut SimSocket> {
        self.sockets.get_mut(sock as usize)
    }

    /// Reserves the first free slot.
    pub fn reserve_socket(&mut self) -> u8 {
        match self.sockets.iter().position(|s| !s.reserved) {
            Some(index) => {
                self.sockets[index].reserved = true;
                index as u8
            }
            None => NO_SOCKET,
        }
    }

    /// Frees slot `sock`, dropping everything it held.
    pub fn release_socket(&mut self, sock: u8) {
        if let Some(socket) = self.socket_mut(sock) {
            *socket = SimSocket::default();
        }
    }

    pub fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
        host.parse()
            .ok()
            .or_else(|| self.hosts.get(host).copied())
    }

    /// Starts a join to `ssid` presenting `secret`.
    pub fn join(&mut self, ssid: &str, secret: Option<&[u8]>) {
        let network = self.networks.iter().find(|n| n.ssid == ssid).cloned();
        let (status, network) = match network {
            Some(n) if n.accepts(secret) => (WL_CONNECTED, Some(n)),
            Some(_) => (WL_CONNECT_FAILED, None),
            None => (WL_NO_SSID_AVAIL, None),
        };
        self.link = LinkState {
            status,
            pending_polls: self.join_latency,
            network,
        };
    }

    /// Brings up an access point named `ssid`.
    pub fn start_ap(&mut self, ssid: &str, channel: u8, secret: Option<&[u8]>) {
        let network = SimNetwork {
            secret: secret.map(<[u8]>::to_vec),
            encryption: if secret.is_some() { ENC_CCMP } else { ENC_NONE },
            ..SimNetwork::open(ssid).with_channel(channel)
        };
        self.link = LinkState {
            status: WL_AP_LISTENING,
            pending_polls: 0,
            network: Some(network),
        };
    }

    /// Link status as seen by the next status query.
    pub fn poll_status(&mut self) -> u8 {
        if self.link.pending_polls > 0 {
            self.link.pending_polls -= 1;
            WL_IDLE
        } else {
            self.link.status
        }
    }

    pub fn disconnect(&mut self) {
        self.link = LinkState {
            status: WL_DISCONNECTED,
            pending_polls: 0,
            network: None,
        };
    }
}
