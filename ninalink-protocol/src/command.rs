//! Command opcodes understood by the co-processor firmware.

use crate::frame::ParamWidth;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Command opcodes (7-bit; the high bit is reserved for [`crate::REPLY_FLAG`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Command {
    // Station / access point setup
    SetNet = 0x10,
    SetPassphrase = 0x11,
    SetKey = 0x12,
    SetIpConfig = 0x14,
    SetDnsConfig = 0x15,
    SetHostname = 0x16,
    SetPowerMode = 0x17,
    SetApNet = 0x18,
    SetApPassphrase = 0x19,
    SetDebug = 0x1A,
    GetTemperature = 0x1B,

    // Link status
    GetConnStatus = 0x20,
    GetIpAddr = 0x21,
    GetMacAddr = 0x22,
    GetCurrSsid = 0x23,
    GetCurrBssid = 0x24,
    GetCurrRssi = 0x25,
    GetCurrEnct = 0x26,
    ScanNetworks = 0x27,

    // Sockets
    StartServerTcp = 0x28,
    GetStateTcp = 0x29,
    DataSentTcp = 0x2A,
    AvailDataTcp = 0x2B,
    GetDataTcp = 0x2C,
    StartClientTcp = 0x2D,
    StopClientTcp = 0x2E,
    GetClientStateTcp = 0x2F,
    Disconnect = 0x30,
    GetIdxRssi = 0x32,
    GetIdxEnct = 0x33,
    ReqHostByName = 0x34,
    GetHostByName = 0x35,
    StartScanNetworks = 0x36,
    GetFwVersion = 0x37,
    SendDataUdp = 0x39,
    GetRemoteData = 0x3A,
    GetTime = 0x3B,
    GetIdxBssid = 0x3C,
    GetIdxChannel = 0x3D,
    Ping = 0x3E,
    GetSocket = 0x3F,

    // Bulk data
    SendDataTcp = 0x44,
    GetDatabufTcp = 0x45,
    InsertDatabuf = 0x46,

    // Pin passthrough
    SetPinMode = 0x50,
    SetDigitalWrite = 0x51,
    SetAnalogWrite = 0x52,
}

impl Command {
    const ALL: [Command; 47] = [
        Command::SetNet,
        Command::SetPassphrase,
        Command::SetKey,
        Command::SetIpConfig,
        Command::SetDnsConfig,
        Command::SetHostname,
        Command::SetPowerMode,
        Command::SetApNet,
        Command::SetApPassphrase,
        Command::SetDebug,
        Command::GetTemperature,
        Command::GetConnStatus,
        Command::GetIpAddr,
        Command::GetMacAddr,
        Command::GetCurrSsid,
        Command::GetCurrBssid,
        Command::GetCurrRssi,
        Command::GetCurrEnct,
        Command::ScanNetworks,
        Command::StartServerTcp,
        Command::GetStateTcp,
        Command::DataSentTcp,
        Command::AvailDataTcp,
        Command::GetDataTcp,
        Command::StartClientTcp,
        Command::StopClientTcp,
        Command::GetClientStateTcp,
        Command::Disconnect,
        Command::GetIdxRssi,
        Command::GetIdxEnct,
        Command::ReqHostByName,
        Command::GetHostByName,
        Command::StartScanNetworks,
        Command::GetFwVersion,
        Command::SendDataUdp,
        Command::GetRemoteData,
        Command::GetTime,
        Command::GetIdxBssid,
        Command::GetIdxChannel,
        Command::Ping,
        Command::GetSocket,
        Command::SendDataTcp,
        Command::GetDatabufTcp,
        Command::InsertDatabuf,
        Command::SetPinMode,
        Command::SetDigitalWrite,
        Command::SetAnalogWrite,
    ];

    /// Returns the raw opcode byte.
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Looks up a command from its opcode. The reply flag is ignored.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        let opcode = opcode & !crate::REPLY_FLAG;
        Self::ALL.iter().copied().find(|c| c.opcode() == opcode)
    }

    /// Looks up a command by its firmware name. Case and the `_CMD`
    /// suffix are ignored.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_uppercase();
        let wanted = wanted.strip_suffix("_CMD").unwrap_or(&wanted);
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().strip_suffix("_CMD").unwrap_or(c.name()) == wanted)
    }

    /// Every known command, in opcode order.
    pub fn all() -> &'static [Command] {
        &Self::ALL
    }

    /// Parameter width used by this command on the request side.
    ///
    /// Bulk data commands carry 16-bit length prefixes; everything else
    /// uses single-byte lengths.
    pub fn request_width(self) -> ParamWidth {
        match self {
            Command::SendDataTcp | Command::GetDatabufTcp | Command::InsertDatabuf => {
                ParamWidth::Wide
            }
            _ => ParamWidth::Narrow,
        }
    }

    /// Parameter width the device uses when replying to this command.
    ///
    /// `SEND_DATA_TCP` is sent wide but acknowledged with a narrow reply.
    pub fn reply_width(self) -> ParamWidth {
        match self {
            Command::GetDatabufTcp | Command::InsertDatabuf => ParamWidth::Wide,
            _ => ParamWidth::Narrow,
        }
    }

    /// Returns the firmware's name for this command.
    pub fn name(self) -> &'static str {
        match self {
            Command::SetNet => "SET_NET_CMD",
            Command::SetPassphrase => "SET_PASSPHRASE_CMD",
            Command::SetKey => "SET_KEY_CMD",
            Command::SetIpConfig => "SET_IP_CONFIG_CMD",
            Command::SetDnsConfig => "SET_DNS_CONFIG_CMD",
            Command::SetHostname => "SET_HOSTNAME_CMD",
            Command::SetPowerMode => "SET_POWER_MODE_CMD",
            Command::SetApNet => "SET_AP_NET_CMD",
            Command::SetApPassphrase => "SET_AP_PASSPHRASE_CMD",
            Command::SetDebug => "SET_DEBUG_CMD",
            Command::GetTemperature => "GET_TEMPERATURE_CMD",
            Command::GetConnStatus => "GET_CONN_STATUS_CMD",
            Command::GetIpAddr => "GET_IPADDR_CMD",
            Command::GetMacAddr => "GET_MACADDR_CMD",
            Command::GetCurrSsid => "GET_CURR_SSID_CMD",
            Command::GetCurrBssid => "GET_CURR_BSSID_CMD",
            Command::GetCurrRssi => "GET_CURR_RSSI_CMD",
            Command::GetCurrEnct => "GET_CURR_ENCT_CMD",
            Command::ScanNetworks => "SCAN_NETWORKS",
            Command::StartServerTcp => "START_SERVER_TCP_CMD",
            Command::GetStateTcp => "GET_STATE_TCP_CMD",
            Command::DataSentTcp => "DATA_SENT_TCP_CMD",
            Command::AvailDataTcp => "AVAIL_DATA_TCP_CMD",
            Command::GetDataTcp => "GET_DATA_TCP_CMD",
            Command::StartClientTcp => "START_CLIENT_TCP_CMD",
            Command::StopClientTcp => "STOP_CLIENT_TCP_CMD",
            Command::GetClientStateTcp => "GET_CLIENT_STATE_TCP_CMD",
            Command::Disconnect => "DISCONNECT_CMD",
            Command::GetIdxRssi => "GET_IDX_RSSI_CMD",
            Command::GetIdxEnct => "GET_IDX_ENCT_CMD",
            Command::ReqHostByName => "REQ_HOST_BY_NAME_CMD",
            Command::GetHostByName => "GET_HOST_BY_NAME_CMD",
            Command::StartScanNetworks => "START_SCAN_NETWORKS",
            Command::GetFwVersion => "GET_FW_VERSION_CMD",
            Command::SendDataUdp => "SEND_DATA_UDP_CMD",
            Command::GetRemoteData => "GET_REMOTE_DATA_CMD",
            Command::GetTime => "GET_TIME_CMD",
            Command::GetIdxBssid => "GET_IDX_BSSID",
            Command::GetIdxChannel => "GET_IDX_CHANNEL_CMD",
            Command::Ping => "PING_CMD",
            Command::GetSocket => "GET_SOCKET_CMD",
            Command::SendDataTcp => "SEND_DATA_TCP_CMD",
            Command::GetDatabufTcp => "GET_DATABUF_TCP_CMD",
            Command::InsertDatabuf => "INSERT_DATABUF_CMD",
            Command::SetPinMode => "SET_PIN_MODE",
            Command::SetDigitalWrite => "SET_DIGITAL_WRITE",
            Command::SetAnalogWrite => "SET_ANALOG_WRITE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#04x})", self.name(), self.opcode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_lookup() {
        assert_eq!(Command::from_opcode(0x2D), Some(Command::StartClientTcp));
        assert_eq!(Command::from_opcode(0x3F), Some(Command::GetSocket));
        assert_eq!(Command::from_opcode(0x45), Some(Command::GetDatabufTcp));
        assert_eq!(Command::from_opcode(0x13), None);
        assert_eq!(Command::from_opcode(0x7F), None);
    }

    #[test]
    fn test_name_lookup() {
        assert_eq!(
            Command::from_name("START_CLIENT_TCP_CMD"),
            Some(Command::StartClientTcp)
        );
        assert_eq!(Command::from_name("start_client_tcp"), Some(Command::StartClientTcp));
        assert_eq!(Command::from_name("SCAN_NETWORKS"), Some(Command::ScanNetworks));
        assert_eq!(Command::from_name("scan_networks_cmd"), Some(Command::ScanNetworks));
        assert_eq!(Command::from_name("NOT_A_COMMAND"), None);
    }

    #[test]
    fn test_lookup_ignores_reply_flag() {
        assert_eq!(Command::from_opcode(0xAD), Some(Command::StartClientTcp));
        assert_eq!(Command::from_opcode(0xA0), Some(Command::GetConnStatus));
    }

    #[test]
    fn test_all_opcodes_fit_in_seven_bits() {
        for cmd in Command::ALL {
            assert_eq!(cmd.opcode() & crate::REPLY_FLAG, 0, "{}", cmd);
        }
    }

    #[test]
    fn test_bulk_commands_are_wide() {
        assert_eq!(Command::SendDataTcp.request_width(), ParamWidth::Wide);
        assert_eq!(Command::GetDatabufTcp.request_width(), ParamWidth::Wide);
        assert_eq!(Command::InsertDatabuf.request_width(), ParamWidth::Wide);
        assert_eq!(Command::GetSocket.request_width(), ParamWidth::Narrow);

        assert_eq!(Command::SendDataTcp.reply_width(), ParamWidth::Narrow);
        assert_eq!(Command::GetDatabufTcp.reply_width(), ParamWidth::Wide);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Command::StartClientTcp.to_string(),
            "START_CLIENT_TCP_CMD(0x2d)"
        );
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&Command::GetSocket).unwrap();
        assert_eq!(json, "\"GET_SOCKET\"");
    }
}
