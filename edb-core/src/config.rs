//! Monitor configuration.
//!
//! The timing constants depend on the target clock and have to be
//! recalibrated per board; everything here can be loaded from JSON.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Direction of the codepoint lines shared by breakpoints and watchpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodepointMode {
    /// Lines are driven by the debugger: external breakpoints.
    #[default]
    Inputs,
    /// Lines are driven by the target: passive breakpoints and watchpoints.
    Outputs,
}

/// Clock-dependent delays, in target clock cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Duration of one bit slot of an encoded signal pulse.
    pub sig_bit_cycles: u32,
    /// Settle delay after a passive breakpoint marker.
    pub enter_debug_latency_cycles: u32,
    /// Width of a watchpoint pulse.
    pub watchpoint_duration_cycles: u32,
    /// Minimum distance between two watchpoint pulses.
    pub watchpoint_latency_cycles: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sig_bit_cycles: 128,
            enter_debug_latency_cycles: 200,
            watchpoint_duration_cycles: 32,
            watchpoint_latency_cycles: 150,
        }
    }
}

/// Serial peripheral settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    /// Peripheral source clock.
    pub clock_hz: u32,
    /// Line rate.
    pub baud_rate: u32,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self { clock_hz: 8_000_000, baud_rate: 115_200 }
    }
}

impl UartConfig {
    /// Oversampling prescaler as `(divisor, fraction)`, where the fraction is
    /// in sixteenths: `clock / (16 * baud) = divisor + fraction / 16`.
    pub const fn prescaler(&self) -> (u16, u8) {
        let per_bit = self.clock_hz / self.baud_rate;
        ((per_bit / 16) as u16, (per_bit % 16) as u8)
    }
}

/// Top-level monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Allow the target to request debug mode and send encoded pulses.
    pub target_side_requests: bool,
    /// What the codepoint lines are used for.
    pub codepoints: CodepointMode,
    /// Pull input codepoint lines down.
    pub pull_down_codepoints: bool,
    /// Board wiring quirk: codepoint index `i` lands on pin `n - i - 1`.
    pub reverse_codepoint_pins: bool,
    /// Bytes requested from the transport per dispatch loop iteration.
    pub rx_chunk_bytes: usize,
    /// Clock-dependent delays.
    pub timing: TimingConfig,
    /// Serial settings.
    pub uart: UartConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_side_requests: true,
            codepoints: CodepointMode::default(),
            pull_down_codepoints: false,
            reverse_codepoint_pins: false,
            rx_chunk_bytes: 1,
            timing: TimingConfig::default(),
            uart: UartConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the monitor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=crate::protocol::HEADER_SIZE).contains(&self.rx_chunk_bytes) {
            return Err(Error::Config(format!(
                "rx_chunk_bytes must be between 1 and {}, got {}",
                crate::protocol::HEADER_SIZE,
                self.rx_chunk_bytes
            )));
        }
        if self.timing.sig_bit_cycles == 0 {
            return Err(Error::Config("sig_bit_cycles must be non-zero".into()));
        }
        if self.uart.baud_rate == 0
            || u64::from(self.uart.clock_hz) < u64::from(self.uart.baud_rate) * 16
        {
            return Err(Error::Config(format!(
                "clock {} Hz cannot oversample {} baud",
                self.uart.clock_hz, self.uart.baud_rate
            )));
        }
        Ok(())
    }
}
