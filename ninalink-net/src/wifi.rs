//! Station, access point and utility commands.

use crate::commands::{ack, call, read_le16, read_le32, read_u8, slot_ipv4};
use crate::config::WifiConfig;
use crate::error::NetError;
use crate::state::{EncryptionType, WlStatus};
use ninalink_protocol::{Command, Frame, Slot, DUMMY_DATA};
use ninalink_spi::{SpiDriver, Transport};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;

/// Longest SSID the firmware reports.
pub const SSID_MAX_LEN: usize = 32;

/// Most networks a single scan returns.
pub const NETWORKS_MAX: usize = 10;

const MAC_LEN: usize = 6;
const FW_VERSION_MAX_LEN: usize = 16;

/// Failure codes returned by the device's ping.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PingError {
    #[error("destination unreachable")]
    DestinationUnreachable,
    #[error("timed out")]
    Timeout,
    #[error("unknown host")]
    UnknownHost,
    #[error("ping failed")]
    Failed,
}

impl PingError {
    pub fn from_code(code: i16) -> Self {
        match code {
            -1 => PingError::DestinationUnreachable,
            -2 => PingError::Timeout,
            -3 => PingError::UnknownHost,
            _ => PingError::Failed,
        }
    }

    pub fn code(self) -> i16 {
        match self {
            PingError::DestinationUnreachable => -1,
            PingError::Timeout => -2,
            PingError::UnknownHost => -3,
            PingError::Failed => -4,
        }
    }
}

/// One network from the last scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanEntry {
    pub ssid: String,
    pub rssi: i32,
    pub encryption: EncryptionType,
    pub bssid: String,
    pub channel: u8,
}

#[derive(Debug, Default)]
struct WifiState {
    networks: Vec<String>,
    fw_version: Option<String>,
}

/// WiFi command set.
///
/// Scan results and the firmware version are cached per instance.
pub struct WifiDriver<T: Transport> {
    spi: Arc<SpiDriver<T>>,
    config: WifiConfig,
    state: Mutex<WifiState>,
}

impl<T: Transport> WifiDriver<T> {
    pub fn new(spi: Arc<SpiDriver<T>>, config: WifiConfig) -> Self {
        Self {
            spi,
            config,
            state: Mutex::new(WifiState::default()),
        }
    }

    /// Sends `command` with the params added by `build` and requires an ack.
    fn expect_ack(
        &self,
        command: Command,
        build: impl FnOnce(Frame) -> Frame,
    ) -> Result<(), NetError> {
        if ack(&self.spi, &build(Frame::command(command)))? {
            Ok(())
        } else {
            Err(NetError::Rejected(command))
        }
    }

    fn dummy(command: Command) -> Frame {
        Frame::command(command).with_u8(DUMMY_DATA)
    }

    pub fn set_network(&self, ssid: &str) -> Result<(), NetError> {
        self.expect_ack(Command::SetNet, |f| f.with_param(ssid.as_bytes().to_vec()))
    }

    pub fn set_passphrase(&self, ssid: &str, passphrase: &str) -> Result<(), NetError> {
        self.expect_ack(Command::SetPassphrase, |f| {
            f.with_param(ssid.as_bytes().to_vec())
                .with_param(passphrase.as_bytes().to_vec())
        })
    }

    /// Configures WEP with key slot `key_index`.
    pub fn set_key(&self, ssid: &str, key_index: u8, key: &[u8]) -> Result<(), NetError> {
        self.expect_ack(Command::SetKey, |f| {
            f.with_param(ssid.as_bytes().to_vec())
                .with_u8(key_index)
                .with_param(key.to_vec())
        })
    }

    pub fn set_ap_network(&self, ssid: &str, channel: u8) -> Result<(), NetError> {
        self.expect_ack(Command::SetApNet, |f| {
            f.with_param(ssid.as_bytes().to_vec()).with_u8(channel)
        })
    }

    pub fn set_ap_passphrase(
        &self,
        ssid: &str,
        passphrase: &str,
        channel: u8,
    ) -> Result<(), NetError> {
        self.expect_ack(Command::SetApPassphrase, |f| {
            f.with_param(ssid.as_bytes().to_vec())
                .with_param(passphrase.as_bytes().to_vec())
                .with_u8(channel)
        })
    }

    /// Joins an open network and waits for the outcome.
    pub fn begin(&self, ssid: &str) -> Result<WlStatus, NetError> {
        self.set_network(ssid)?;
        Ok(self.wait_join())
    }

    /// Joins a WPA network and waits for the outcome.
    pub fn begin_with_passphrase(&self, ssid: &str, passphrase: &str) -> Result<WlStatus, NetError> {
        self.set_passphrase(ssid, passphrase)?;
        Ok(self.wait_join())
    }

    /// Joins a WEP network and waits for the outcome.
    pub fn begin_with_key(&self, ssid: &str, key_index: u8, key: &[u8]) -> Result<WlStatus, NetError> {
        self.set_key(ssid, key_index, key)?;
        Ok(self.wait_join())
    }

    /// Starts an open access point.
    pub fn begin_ap(&self, ssid: &str, channel: u8) -> Result<WlStatus, NetError> {
        self.set_ap_network(ssid, channel)?;
        Ok(self.wait_join())
    }

    /// Starts a WPA access point.
    pub fn begin_ap_with_passphrase(
        &self,
        ssid: &str,
        passphrase: &str,
        channel: u8,
    ) -> Result<WlStatus, NetError> {
        self.set_ap_passphrase(ssid, passphrase, channel)?;
        Ok(self.wait_join())
    }

    /// Polls the link status until it leaves the joining states.
    fn wait_join(&self) -> WlStatus {
        let mut status = WlStatus::Idle;
        for _ in 0..self.config.join_attempts {
            std::thread::sleep(self.config.join_interval());
            status = self.connection_status();
            if !status.is_joining() {
                break;
            }
        }
        tracing::info!("join finished: {:?}", status);
        status
    }

    /// Sets a static address. `valid_params` counts how many of the
    /// addresses the device should apply.
    pub fn set_ip_config(
        &self,
        valid_params: u8,
        local_ip: Ipv4Addr,
        gateway: Ipv4Addr,
        subnet: Ipv4Addr,
    ) -> Result<(), NetError> {
        self.expect_ack(Command::SetIpConfig, |f| {
            f.with_u8(valid_params)
                .with_ipv4(local_ip)
                .with_ipv4(gateway)
                .with_ipv4(subnet)
        })
    }

    pub fn set_dns(&self, valid_params: u8, dns1: Ipv4Addr, dns2: Ipv4Addr) -> Result<(), NetError> {
        self.expect_ack(Command::SetDnsConfig, |f| {
            f.with_u8(valid_params)
                .with_ipv4(dns1)
                .with_ipv4(dns2)
        })
    }

    pub fn set_hostname(&self, hostname: &str) -> Result<(), NetError> {
        self.expect_ack(Command::SetHostname, |f| {
            f.with_param(hostname.as_bytes().to_vec())
        })
    }

    pub fn disconnect(&self) -> Result<(), NetError> {
        self.expect_ack(Command::Disconnect, |f| f.with_u8(DUMMY_DATA))
    }

    /// Link status; `NoModule` when the device does not answer.
    pub fn connection_status(&self) -> WlStatus {
        match read_u8(&self.spi, &Frame::command(Command::GetConnStatus)) {
            Ok(Some(raw)) => WlStatus::from_raw(raw),
            Ok(None) => WlStatus::NoModule,
            Err(e) => {
                tracing::debug!("status query failed: {}", e);
                WlStatus::NoModule
            }
        }
    }

    pub fn mac_address(&self) -> Result<[u8; MAC_LEN], NetError> {
        self.read_mac(Command::GetMacAddr, Self::dummy(Command::GetMacAddr))
    }

    fn read_mac(&self, command: Command, frame: Frame) -> Result<[u8; MAC_LEN], NetError> {
        let mut slots = [Slot::for_value(MAC_LEN)];
        call(&self.spi, &frame, &mut slots)?;
        slots[0]
            .as_bytes()
            .try_into()
            .map_err(|_| NetError::NoReply(command))
    }

    /// Local address, subnet mask and gateway.
    pub fn network_data(&self) -> Result<(Ipv4Addr, Ipv4Addr, Ipv4Addr), NetError> {
        let mut slots = [
            Slot::for_value(4),
            Slot::for_value(4),
            Slot::for_value(4),
        ];
        let read = call(&self.spi, &Self::dummy(Command::GetIpAddr), &mut slots)?;
        match (read, slot_ipv4(&slots[0]), slot_ipv4(&slots[1]), slot_ipv4(&slots[2])) {
            (3, Some(ip), Some(mask), Some(gateway)) => Ok((ip, mask, gateway)),
            _ => Err(NetError::NoReply(Command::GetIpAddr)),
        }
    }

    pub fn local_ip(&self) -> Result<Ipv4Addr, NetError> {
        Ok(self.network_data()?.0)
    }

    pub fn subnet_mask(&self) -> Result<Ipv4Addr, NetError> {
        Ok(self.network_data()?.1)
    }

    pub fn gateway_ip(&self) -> Result<Ipv4Addr, NetError> {
        Ok(self.network_data()?.2)
    }

    pub fn current_ssid(&self) -> Result<String, NetError> {
        let mut slots = [Slot::for_value(SSID_MAX_LEN)];
        call(&self.spi, &Self::dummy(Command::GetCurrSsid), &mut slots)?;
        Ok(String::from_utf8_lossy(slots[0].as_bytes()).into_owned())
    }

    pub fn current_bssid(&self) -> Result<[u8; MAC_LEN], NetError> {
        self.read_mac(Command::GetCurrBssid, Self::dummy(Command::GetCurrBssid))
    }

    pub fn current_rssi(&self) -> Result<i32, NetError> {
        read_le32(&self.spi, &Self::dummy(Command::GetCurrRssi))?
            .map(|raw| raw as i32)
            .ok_or(NetError::NoReply(Command::GetCurrRssi))
    }

    pub fn current_encryption(&self) -> Result<EncryptionType, NetError> {
        read_u8(&self.spi, &Self::dummy(Command::GetCurrEnct))?
            .map(EncryptionType::from_raw)
            .ok_or(NetError::NoReply(Command::GetCurrEnct))
    }

    pub fn start_scan(&self) -> Result<bool, NetError> {
        Ok(ack(&self.spi, &Frame::command(Command::StartScanNetworks))?)
    }

    /// Scans and waits for results. Returns the number of networks found,
    /// `0` if none showed up within the polling budget.
    pub fn scan_networks(&self) -> usize {
        match self.start_scan() {
            Ok(true) => {}
            Ok(false) => tracing::warn!("scan start not acknowledged"),
            Err(e) => {
                tracing::warn!("scan start failed: {}", e);
                return 0;
            }
        }

        for attempt in 1..=self.config.scan_attempts {
            std::thread::sleep(self.config.scan_interval());
            match self.fetch_scan_results() {
                Ok(0) => tracing::trace!("scan poll {}: no results yet", attempt),
                Ok(found) => {
                    tracing::info!("scan found {} networks", found);
                    return found;
                }
                Err(e) => tracing::debug!("scan poll {} failed: {}", attempt, e),
            }
        }
        0
    }

    /// Reads the device's current scan table into this instance.
    pub fn fetch_scan_results(&self) -> Result<usize, NetError> {
        let mut slots: Vec<Slot> = (0..NETWORKS_MAX)
            .map(|_| Slot::for_value(SSID_MAX_LEN))
            .collect();
        let read = call(&self.spi, &Frame::command(Command::ScanNetworks), &mut slots)?;

        let networks: Vec<String> = slots[..read]
            .iter()
            .map(|slot| String::from_utf8_lossy(slot.as_bytes()).into_owned())
            .collect();
        self.state.lock().networks = networks;
        Ok(read)
    }

    /// SSID at `index` in the last scan.
    pub fn ssid(&self, index: usize) -> Option<String> {
        self.state.lock().networks.get(index).cloned()
    }

    /// Every SSID from the last scan.
    pub fn networks(&self) -> Vec<String> {
        self.state.lock().networks.clone()
    }

    pub fn rssi(&self, index: u8) -> Result<i32, NetError> {
        let frame = Frame::command(Command::GetIdxRssi).with_u8(index);
        read_le32(&self.spi, &frame)?
            .map(|raw| raw as i32)
            .ok_or(NetError::NoReply(Command::GetIdxRssi))
    }

    pub fn encryption(&self, index: u8) -> Result<EncryptionType, NetError> {
        let frame = Frame::command(Command::GetIdxEnct).with_u8(index);
        read_u8(&self.spi, &frame)?
            .map(EncryptionType::from_raw)
            .ok_or(NetError::NoReply(Command::GetIdxEnct))
    }

    pub fn bssid(&self, index: u8) -> Result<[u8; MAC_LEN], NetError> {
        self.read_mac(
            Command::GetIdxBssid,
            Frame::command(Command::GetIdxBssid).with_u8(index),
        )
    }

    pub fn channel(&self, index: u8) -> Result<u8, NetError> {
        let frame = Frame::command(Command::GetIdxChannel).with_u8(index);
        read_u8(&self.spi, &frame)?.ok_or(NetError::NoReply(Command::GetIdxChannel))
    }

    /// Details of every network in the last scan.
    pub fn scan_entries(&self) -> Result<Vec<ScanEntry>, NetError> {
        self.networks()
            .into_iter()
            .enumerate()
            .map(|(index, ssid)| {
                let index = index as u8;
                Ok(ScanEntry {
                    ssid,
                    rssi: self.rssi(index)?,
                    encryption: self.encryption(index)?,
                    bssid: format_mac(&self.bssid(index)?),
                    channel: self.channel(index)?,
                })
            })
            .collect()
    }

    /// Resolves `host` on the device.
    pub fn host_by_name(&self, host: &str) -> Result<Ipv4Addr, NetError> {
        let request =
            Frame::command(Command::ReqHostByName).with_param(host.as_bytes().to_vec());
        if !ack(&self.spi, &request)? {
            return Err(NetError::HostNotFound(host.to_string()));
        }

        let mut slots = [Slot::for_value(4)];
        call(&self.spi, &Frame::command(Command::GetHostByName), &mut slots)?;
        match slot_ipv4(&slots[0]) {
            Some(ip) if ip != Ipv4Addr::BROADCAST && !ip.is_unspecified() => Ok(ip),
            _ => Err(NetError::HostNotFound(host.to_string())),
        }
    }

    /// Firmware version string, read once per instance.
    pub fn firmware_version(&self) -> Result<String, NetError> {
        if let Some(version) = self.state.lock().fw_version.clone() {
            return Ok(version);
        }

        let mut slots = [Slot::for_value(FW_VERSION_MAX_LEN)];
        let read = call(&self.spi, &Frame::command(Command::GetFwVersion), &mut slots)?;
        if read == 0 {
            return Err(NetError::NoReply(Command::GetFwVersion));
        }
        let version = String::from_utf8_lossy(slots[0].as_bytes()).into_owned();
        self.state.lock().fw_version = Some(version.clone());
        Ok(version)
    }

    /// Seconds since the epoch, as kept by the device.
    pub fn time(&self) -> Result<u32, NetError> {
        read_le32(&self.spi, &Self::dummy(Command::GetTime))?
            .ok_or(NetError::NoReply(Command::GetTime))
    }

    pub fn set_power_mode(&self, low_power: bool) -> Result<(), NetError> {
        self.expect_ack(Command::SetPowerMode, |f| {
            f.with_u8(low_power as u8)
        })
    }

    /// Pings `ip`, returning the round trip in milliseconds.
    pub fn ping(&self, ip: Ipv4Addr, ttl: u8) -> Result<u16, PingError> {
        let frame = Frame::command(Command::Ping).with_ipv4(ip).with_u8(ttl);
        match read_le16(&self.spi, &frame) {
            Ok(Some(raw)) if (raw as i16) >= 0 => Ok(raw),
            Ok(Some(raw)) => Err(PingError::from_code(raw as i16)),
            Ok(None) => Err(PingError::Failed),
            Err(e) => {
                tracing::debug!("ping failed: {}", e);
                Err(PingError::Failed)
            }
        }
    }

    /// Resolves `host` and pings it.
    pub fn ping_host(&self, host: &str, ttl: u8) -> Result<u16, PingError> {
        let ip = self
            .host_by_name(host)
            .map_err(|_| PingError::UnknownHost)?;
        self.ping(ip, ttl)
    }

    pub fn set_debug(&self, enabled: bool) -> Result<(), NetError> {
        self.expect_ack(Command::SetDebug, |f| {
            f.with_u8(enabled as u8)
        })
    }

    /// Die temperature in degrees Celsius.
    pub fn temperature(&self) -> Result<f32, NetError> {
        read_le32(&self.spi, &Self::dummy(Command::GetTemperature))?
            .map(f32::from_bits)
            .ok_or(NetError::NoReply(Command::GetTemperature))
    }

    pub fn pin_mode(&self, pin: u8, mode: u8) -> Result<(), NetError> {
        self.expect_ack(Command::SetPinMode, |f| {
            f.with_u8(pin).with_u8(mode)
        })
    }

    pub fn digital_write(&self, pin: u8, value: bool) -> Result<(), NetError> {
        self.expect_ack(Command::SetDigitalWrite, |f| {
            f.with_u8(pin)
                .with_u8(value as u8)
        })
    }

    pub fn analog_write(&self, pin: u8, value: u8) -> Result<(), NetError> {
        self.expect_ack(Command::SetAnalogWrite, |f| {
            f.with_u8(pin)
                .with_u8(value)
        })
    }
}

/// Formats a MAC/BSSID as colon-separated hex.
pub fn format_mac(mac: &[u8]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ninalink_sim::{SimDevice, SimHandle, SimNetwork};
    use ninalink_spi::{LinkConfig, Signals};
    use std::time::Duration;

    fn wifi() -> (WifiDriver<SimDevice>, SimHandle) {
        let signals = Signals::new();
        let (device, sim) = SimDevice::new(&signals);
        let spi = Arc::new(SpiDriver::new(device, signals, LinkConfig::instant()));
        let config = WifiConfig::default().with_poll_interval(Duration::from_millis(1));
        (WifiDriver::new(spi, config), sim)
    }

    #[test]
    fn test_ping_codes() {
        for code in -4..=-1 {
            assert_eq!(PingError::from_code(code).code(), code);
        }
        assert_eq!(PingError::from_code(-9), PingError::Failed);
    }

    #[test]
    fn test_signed_rssi_and_time() {
        let (wifi, sim) = wifi();
        sim.add_network(SimNetwork::open("lab").with_rssi(-50));

        assert_eq!(wifi.scan_networks(), 1);
        assert_eq!(wifi.rssi(0).unwrap(), -50);
        assert_eq!(wifi.begin("lab").unwrap(), WlStatus::Connected);
        assert_eq!(wifi.current_rssi().unwrap(), -50);
        assert_eq!(wifi.time().unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(&[0xde, 0xad, 0, 1, 2, 0xff]), "de:ad:00:01:02:ff");
    }

    #[test]
    fn test_join_open_network() {
        let (wifi, sim) = wifi();
        sim.add_network(SimNetwork::open("cafe"));
        sim.set_join_latency(3);

        assert_eq!(wifi.connection_status(), WlStatus::Idle);
        assert_eq!(wifi.begin("cafe").unwrap(), WlStatus::Connected);
        assert_eq!(wifi.current_ssid().unwrap(), "cafe");
    }

    #[test]
    fn test_join_wrong_passphrase() {
        let (wifi, sim) = wifi();
        sim.add_network(SimNetwork::secured("home", "correct horse"));

        assert_eq!(
            wifi.begin_with_passphrase("home", "battery staple").unwrap(),
            WlStatus::ConnectFailed
        );
    }

    #[test]
    fn test_join_missing_network_exhausts_budget() {
        let (wifi, sim) = wifi();
        assert_eq!(wifi.begin("nowhere").unwrap(), WlStatus::NoSsidAvail);
        assert_eq!(sim.command_count(Command::GetConnStatus), 10);
    }

    #[test]
    fn test_scan_waits_for_results() {
        let (wifi, sim) = wifi();
        sim.add_network(SimNetwork::open("alpha").with_rssi(-40).with_channel(6));
        sim.add_network(SimNetwork::secured("beta", "pw"));
        sim.set_scan_latency(2);

        assert_eq!(wifi.scan_networks(), 2);
        assert_eq!(sim.command_count(Command::ScanNetworks), 3);
        assert_eq!(wifi.ssid(0).as_deref(), Some("alpha"));
        assert_eq!(wifi.ssid(2), None);

        let entries = wifi.scan_entries().unwrap();
        assert_eq!(entries[0].rssi, -40);
        assert_eq!(entries[0].channel, 6);
        assert_eq!(entries[0].encryption, EncryptionType::None);
        assert_eq!(entries[1].encryption, EncryptionType::Ccmp);
    }

    #[test]
    fn test_scan_with_no_networks_returns_zero() {
        let (wifi, sim) = wifi();
        assert_eq!(wifi.scan_networks(), 0);
        assert_eq!(sim.command_count(Command::ScanNetworks), 10);
        assert!(wifi.networks().is_empty());
    }

    #[test]
    fn test_host_lookup() {
        let (wifi, sim) = wifi();
        sim.add_host("example.com", Ipv4Addr::new(93, 184, 216, 34));

        assert_eq!(
            wifi.host_by_name("example.com").unwrap(),
            Ipv4Addr::new(93, 184, 216, 34)
        );
        assert_eq!(
            wifi.host_by_name("missing.invalid"),
            Err(NetError::HostNotFound("missing.invalid".into()))
        );
        assert_eq!(wifi.ping_host("missing.invalid", 64), Err(PingError::UnknownHost));
        assert!(wifi.ping_host("example.com", 64).is_ok());
    }

    #[test]
    fn test_firmware_version_cached() {
        let (wifi, sim) = wifi();
        assert_eq!(wifi.firmware_version().unwrap(), "1.2.1");
        assert_eq!(wifi.firmware_version().unwrap(), "1.2.1");
        assert_eq!(sim.command_count(Command::GetFwVersion), 1);
    }

    #[test]
    fn test_network_data_and_static_config() {
        let (wifi, _sim) = wifi();
        wifi.set_ip_config(
            3,
            Ipv4Addr::new(192, 168, 1, 50),
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .unwrap();

        let (ip, mask, gateway) = wifi.network_data().unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(mask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(gateway, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(wifi.mac_address().unwrap().len(), 6);
    }

    #[test]
    fn test_pins_and_misc() {
        let (wifi, sim) = wifi();
        wifi.pin_mode(25, 1).unwrap();
        wifi.digital_write(25, true).unwrap();
        wifi.analog_write(26, 128).unwrap();
        assert_eq!(sim.pin(25), Some((1, 1)));
        assert_eq!(sim.pin(26), Some((0, 128)));

        assert!(wifi.temperature().unwrap() > 0.0);
        assert!(wifi.time().unwrap() > 0);
        wifi.set_power_mode(true).unwrap();
        wifi.set_debug(false).unwrap();
    }

    #[test]
    fn test_access_point() {
        let (wifi, _sim) = wifi();
        assert_eq!(wifi.begin_ap("ninalink-ap", 6).unwrap(), WlStatus::ApListening);
        wifi.disconnect().unwrap();
        assert_eq!(wifi.connection_status(), WlStatus::Disconnected);
    }
}
