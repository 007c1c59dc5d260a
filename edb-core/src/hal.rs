//! Hardware the monitor drives, other than the serial port.
//!
//! Pin-level traits mirror the registers the monitor touches so that the
//! pulse sequences in [`crate::signal`] keep their exact shape on real
//! hardware and in the simulation.

use crate::Result;

/// The dedicated signal line to the debugger.
pub trait SignalPin: Send {
    /// Set the output latch.
    fn set_output(&mut self, high: bool);

    /// Drive the line (`true`) or leave it floating (`false`).
    fn set_driven(&mut self, driven: bool);

    /// Sample the input level.
    fn is_high(&self) -> bool;

    /// Trigger on rising edges.
    fn select_rising_edge(&mut self);

    /// Clear a pending edge.
    fn clear_edge_flag(&mut self);

    /// Enable or disable the edge interrupt.
    fn enable_edge_interrupt(&mut self, enable: bool);

    /// An edge is latched and its interrupt is enabled.
    fn edge_pending(&self) -> bool;
}

/// Busy-wait measured in target clock cycles.
pub trait CycleDelay: Send {
    /// Spin for `cycles` cycles.
    fn delay_cycles(&mut self, cycles: u32);
}

/// Lines between target and debugger used for breakpoints and watchpoints.
pub trait CodepointPort: Send {
    /// Number of lines.
    fn line_count(&self) -> u8;

    /// Make every line an output (driven low) or an input.
    fn configure(&mut self, output: bool, pull_down: bool);

    /// Sample the lines, bit `i` is line `i`.
    fn read(&self) -> u8;

    /// Drive the lines, bit `i` is line `i`.
    fn write(&mut self, bits: u8);
}

/// Indicators mirroring the monitor state.
pub trait StateIndicator: Send {
    /// Show the encoded state (two pins on hardware).
    fn show_state(&mut self, code: u8);

    /// Light the LED while the command loop runs.
    fn set_debug_led(&mut self, on: bool);
}

impl StateIndicator for () {
    fn show_state(&mut self, _code: u8) {}

    fn set_debug_led(&mut self, _on: bool) {}
}

/// Source of the program counter at the time the application was interrupted.
pub trait ProgramCounter: Send {
    /// Current application program counter.
    fn program_counter(&self) -> u32;
}

/// Raw byte access to target memory.
pub trait TargetMemory: Send + Sync {
    /// Read one byte.
    fn read_byte(&self, address: u32) -> u8;

    /// Write one byte.
    fn write_byte(&self, address: u32, value: u8);
}

/// Non-volatile home of the internal breakpoint mask.
pub trait NvStore: Send {
    /// Last stored mask, zero if nothing was ever stored.
    fn load(&self) -> Result<u16>;

    /// Persist a new mask.
    fn store(&mut self, mask: u16) -> Result<()>;
}

/// Entry point of the signal line interrupt.
pub trait EdgeHandler: Send + Sync {
    /// Service a rising edge on the signal line.
    fn on_signal_edge(&self);
}
