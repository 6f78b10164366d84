//! Link timing configuration.

use crate::error::LinkError;
use ninalink_protocol::{MAX_FRAME_SIZE, START_MARKER_BUDGET};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and sizing of the select/transfer handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Bound on the pre-command ready wait. Unset waits forever.
    pub ready_timeout_ms: Option<u64>,
    /// Opportunistic ready wait right after selecting the device.
    pub select_wait_ms: u64,
    /// Width of each reset pulse phase.
    pub reset_pulse_ms: u64,
    /// Time the firmware needs to boot after reset is released.
    pub boot_delay_ms: u64,
    /// Inbound bytes scanned for a start marker.
    pub start_marker_budget: usize,
    /// Largest transfer in either direction.
    pub max_frame_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: None,
            select_wait_ms: 5,
            reset_pulse_ms: 10,
            boot_delay_ms: 750,
            start_marker_budget: START_MARKER_BUDGET,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl LinkConfig {
    /// Applies `NINALINK_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(ms) = std::env::var("NINALINK_READY_TIMEOUT_MS") {
            self.ready_timeout_ms = ms.parse().ok().filter(|&ms| ms > 0);
        }

        if let Ok(ms) = std::env::var("NINALINK_SELECT_WAIT_MS") {
            if let Ok(ms) = ms.parse() {
                self.select_wait_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("NINALINK_RESET_PULSE_MS") {
            if let Ok(ms) = ms.parse() {
                self.reset_pulse_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("NINALINK_BOOT_DELAY_MS") {
            if let Ok(ms) = ms.parse() {
                self.boot_delay_ms = ms;
            }
        }
    }

    /// Checks the sizes against what the wire format allows.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.max_frame_size < 4 || self.max_frame_size > MAX_FRAME_SIZE {
            return Err(LinkError::InvalidConfig(format!(
                "max_frame_size must be between 4 and {}, got {}",
                MAX_FRAME_SIZE, self.max_frame_size
            )));
        }
        if self.start_marker_budget == 0 {
            return Err(LinkError::InvalidConfig(
                "start_marker_budget must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// A configuration with every delay zeroed, for emulated devices.
    pub fn instant() -> Self {
        Self {
            select_wait_ms: 0,
            reset_pulse_ms: 0,
            boot_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_ms.map(Duration::from_millis)
    }

    pub fn select_wait(&self) -> Duration {
        Duration::from_millis(self.select_wait_ms)
    }

    pub fn reset_pulse(&self) -> Duration {
        Duration::from_millis(self.reset_pulse_ms)
    }

    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }
}
