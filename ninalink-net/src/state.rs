//! Socket handles and device-reported status values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of sockets the co-processor tracks.
pub const MAX_SOCKETS: usize = 10;

/// A socket slot on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketHandle(u8);

impl SocketHandle {
    /// "No socket available."
    pub const NO_SOCKET: SocketHandle = SocketHandle(255);

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    /// Whether the handle names a real slot.
    pub fn is_valid(self) -> bool {
        (self.0 as usize) < MAX_SOCKETS
    }

    /// Slot index, for valid handles.
    pub fn index(self) -> Option<usize> {
        self.is_valid().then_some(self.0 as usize)
    }
}

impl Default for SocketHandle {
    fn default() -> Self {
        Self::NO_SOCKET
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "socket {}", self.0)
        } else {
            f.write_str("no socket")
        }
    }
}

/// TCP connection state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum TcpState {
    Closed = 0,
    Listen = 1,
    SynSent = 2,
    SynRcvd = 3,
    Established = 4,
    FinWait1 = 5,
    FinWait2 = 6,
    CloseWait = 7,
    Closing = 8,
    LastAck = 9,
    TimeWait = 10,
}

impl TcpState {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => TcpState::Closed,
            1 => TcpState::Listen,
            2 => TcpState::SynSent,
            3 => TcpState::SynRcvd,
            4 => TcpState::Established,
            5 => TcpState::FinWait1,
            6 => TcpState::FinWait2,
            7 => TcpState::CloseWait,
            8 => TcpState::Closing,
            9 => TcpState::LastAck,
            10 => TcpState::TimeWait,
            _ => return None,
        })
    }

    pub fn raw(self) -> u8 {
        self as u8
    }

    /// Whether a socket in this state counts as connected.
    ///
    /// Everything outside the handshake, listen and teardown states does,
    /// which includes `CLOSING` and `LAST_ACK`.
    pub fn is_connected(self) -> bool {
        !matches!(
            self,
            TcpState::Listen
                | TcpState::Closed
                | TcpState::FinWait1
                | TcpState::FinWait2
                | TcpState::TimeWait
                | TcpState::SynSent
                | TcpState::SynRcvd
                | TcpState::CloseWait
        )
    }
}

/// Transport mode requested when opening a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProtocolMode {
    #[default]
    Tcp = 0,
    Udp = 1,
    Tls = 2,
    UdpMulticast = 3,
}

impl ProtocolMode {
    pub fn raw(self) -> u8 {
        self as u8
    }
}

/// Station/AP link status (`wl_status_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WlStatus {
    Idle,
    NoSsidAvail,
    ScanCompleted,
    Connected,
    ConnectFailed,
    ConnectionLost,
    Disconnected,
    ApListening,
    ApConnected,
    ApFailed,
    NoModule,
}

impl WlStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => WlStatus::Idle,
            1 => WlStatus::NoSsidAvail,
            2 => WlStatus::ScanCompleted,
            3 => WlStatus::Connected,
            4 => WlStatus::ConnectFailed,
            5 => WlStatus::ConnectionLost,
            6 => WlStatus::Disconnected,
            7 => WlStatus::ApListening,
            8 => WlStatus::ApConnected,
            9 => WlStatus::ApFailed,
            _ => WlStatus::NoModule,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            WlStatus::Idle => 0,
            WlStatus::NoSsidAvail => 1,
            WlStatus::ScanCompleted => 2,
            WlStatus::Connected => 3,
            WlStatus::ConnectFailed => 4,
            WlStatus::ConnectionLost => 5,
            WlStatus::Disconnected => 6,
            WlStatus::ApListening => 7,
            WlStatus::ApConnected => 8,
            WlStatus::ApFailed => 9,
            WlStatus::NoModule => 255,
        }
    }

    /// Statuses a join attempt keeps waiting through.
    pub fn is_joining(self) -> bool {
        matches!(
            self,
            WlStatus::Idle | WlStatus::NoSsidAvail | WlStatus::ScanCompleted
        )
    }
}

/// Network encryption as reported by scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    Wep,
    Tkip,
    Ccmp,
    None,
    Auto,
    Unknown,
}

impl EncryptionType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            5 => EncryptionType::Wep,
            2 => EncryptionType::Tkip,
            4 => EncryptionType::Ccmp,
            7 => EncryptionType::None,
            8 => EncryptionType::Auto,
            _ => EncryptionType::Unknown,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            EncryptionType::Wep => 5,
            EncryptionType::Tkip => 2,
            EncryptionType::Ccmp => 4,
            EncryptionType::None => 7,
            EncryptionType::Auto => 8,
            EncryptionType::Unknown => 255,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_handle() {
        assert!(SocketHandle::new(0).is_valid());
        assert!(SocketHandle::new(9).is_valid());
        assert!(!SocketHandle::new(10).is_valid());
        assert!(!SocketHandle::NO_SOCKET.is_valid());
        assert_eq!(SocketHandle::NO_SOCKET.raw(), 255);
        assert_eq!(SocketHandle::new(3).index(), Some(3));
        assert_eq!(SocketHandle::NO_SOCKET.index(), None);
        assert_eq!(SocketHandle::default(), SocketHandle::NO_SOCKET);
    }

    #[test]
    fn test_connected_states() {
        assert!(TcpState::Established.is_connected());
        assert!(TcpState::Closing.is_connected());
        assert!(TcpState::LastAck.is_connected());

        for state in [
            TcpState::Closed,
            TcpState::Listen,
            TcpState::SynSent,
            TcpState::SynRcvd,
            TcpState::FinWait1,
            TcpState::FinWait2,
            TcpState::CloseWait,
            TcpState::TimeWait,
        ] {
            assert!(!state.is_connected(), "{:?}", state);
        }
    }

    #[test]
    fn test_tcp_state_raw() {
        for raw in 0..=10 {
            assert_eq!(TcpState::from_raw(raw).unwrap().raw(), raw);
        }
        assert_eq!(TcpState::from_raw(11), None);
    }

    #[test]
    fn test_wl_status_raw() {
        for raw in 0..=9 {
            assert_eq!(WlStatus::from_raw(raw).raw(), raw);
        }
        assert_eq!(WlStatus::from_raw(255), WlStatus::NoModule);
        assert!(WlStatus::ScanCompleted.is_joining());
        assert!(!WlStatus::Connected.is_joining());
    }

    #[test]
    fn test_encryption_raw() {
        assert_eq!(EncryptionType::from_raw(4), EncryptionType::Ccmp);
        assert_eq!(EncryptionType::from_raw(7), EncryptionType::None);
        assert_eq!(EncryptionType::from_raw(3), EncryptionType::Unknown);
        assert_eq!(EncryptionType::Wep.raw(), 5);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&TcpState::SynSent).unwrap(),
            "\"SYN_SENT\""
        );
        assert_eq!(
            serde_json::to_string(&ProtocolMode::UdpMulticast).unwrap(),
            "\"udp_multicast\""
        );
        assert_eq!(serde_json::to_string(&SocketHandle::new(4)).unwrap(), "4");
    }
}
