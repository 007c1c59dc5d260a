//! Application entry points: breakpoints, watchpoints, assertions and
//! energy guards.
//!
//! * Internal breakpoints check a bit of the persisted mask, which only the
//!   debugger changes.
//! * External breakpoints check a codepoint line driven by the debugger.
//! * Passive breakpoints always pulse their index on the codepoint lines and
//!   leave the decision to the debugger, paying a settle delay every time.
//! * Watchpoints pulse one line and never stop the application.

use crate::config::CodepointMode;
use crate::monitor::{Monitor, BREAKPOINT_COUNT};
use crate::protocol::{Features, InterruptType};

impl Monitor {
    fn codepoint_pin(&self, index: u8, lines: u8) -> u8 {
        if self.config().reverse_codepoint_pins {
            lines - index - 1
        } else {
            index
        }
    }

    /// Stop if internal breakpoint `index` is enabled.
    pub fn internal_breakpoint(&self, index: u8) {
        if index >= BREAKPOINT_COUNT {
            return;
        }
        if self.breakpoint_mask() & (1 << index) != 0 {
            self.request_debug_mode(InterruptType::Breakpoint, u16::from(index), Features::FULL);
        }
    }

    /// Stop if the debugger drives codepoint line `index` high.
    pub fn external_breakpoint(&self, index: u8) {
        if self.config().codepoints != CodepointMode::Inputs {
            return;
        }
        let enabled = {
            let core = self.lock();
            let lines = core.codepoints.line_count();
            index < lines && core.codepoints.read() & (1 << self.codepoint_pin(index, lines)) != 0
        };
        if enabled {
            self.request_debug_mode(InterruptType::Breakpoint, u16::from(index), Features::FULL);
        }
    }

    /// Report reaching passive breakpoint `index` on the codepoint lines and
    /// give the debugger time to interrupt.
    pub fn passive_breakpoint(&self, index: u8) {
        if self.config().codepoints != CodepointMode::Outputs {
            return;
        }
        let latency = self.config().timing.enter_debug_latency_cycles;
        let mut core = self.lock();
        // All lines low is not an edge, hence the offset.
        let pattern = u16::from(index) + 1;
        if pattern >= 1 << core.codepoints.line_count() {
            log::debug!("passive breakpoint {index} does not fit the codepoint lines");
            return;
        }
        core.codepoints.write(pattern as u8);
        core.codepoints.write(0);
        core.signal.delay_cycles(latency);
    }

    /// Emit watchpoint `index`.
    pub fn watchpoint(&self, index: u8) {
        if self.config().codepoints != CodepointMode::Outputs {
            return;
        }
        let timing = self.config().timing;
        let mut core = self.lock();
        let lines = core.codepoints.line_count();
        if index >= lines {
            log::debug!("watchpoint {index} has no codepoint line");
            return;
        }
        let bit = 1 << self.codepoint_pin(index, lines);
        core.codepoints.write(bit);
        core.signal.delay_cycles(timing.watchpoint_duration_cycles);
        core.codepoints.write(0);
        core.signal.delay_cycles(timing.watchpoint_latency_cycles);
    }

    /// Stop with an assertion context if `condition` is false. `line`
    /// identifies the assertion to the debugger.
    pub fn assert(&self, condition: bool, line: u32) {
        if !condition {
            self.request_debug_mode(InterruptType::Assert, line as u16, Features::FULL);
        }
    }

    /// Hand power over to the debugger before a region that must not be
    /// disturbed by energy loss.
    pub fn energy_guard_begin(&self) {
        self.request_energy_guard_debug_mode();
    }

    /// End of the guarded region: give power back to the harvester.
    pub fn energy_guard_end(&self) {
        self.resume_application();
    }
}

/// Stop with an assertion context if the condition is false.
#[macro_export]
macro_rules! edb_assert {
    ($monitor:expr, $cond:expr $(,)?) => {
        $monitor.assert($cond, line!())
    };
}

/// Run a block inside an energy guard and return its value.
#[macro_export]
macro_rules! energy_guard {
    ($monitor:expr, $body:block) => {{
        let monitor = &$monitor;
        monitor.energy_guard_begin();
        let value = $body;
        monitor.energy_guard_end();
        value
    }};
}

/// Print through the console without disturbing the energy state.
#[macro_export]
macro_rules! eif_printf {
    ($monitor:expr, $($arg:tt)*) => {
        $monitor.eif_print(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use crate::config::{CodepointMode, MonitorConfig};
    use crate::sim::SimBoard;

    fn outputs(reverse: bool) -> SimBoard {
        let config = MonitorConfig {
            codepoints: CodepointMode::Outputs,
            reverse_codepoint_pins: reverse,
            ..MonitorConfig::default()
        };
        let board = SimBoard::new(config).unwrap();
        board.monitor.init();
        board
    }

    #[test]
    fn test_passive_breakpoint_pattern() {
        let board = outputs(false);
        board.monitor.passive_breakpoint(0);
        board.monitor.passive_breakpoint(2);
        board.monitor.passive_breakpoint(3);
        assert_eq!(board.codepoint_writes(), vec![0b01, 0, 0b11, 0]);
    }

    #[test]
    fn test_passive_breakpoint_pays_latency() {
        let board = outputs(false);
        let before = board.wire.now();
        board.monitor.passive_breakpoint(1);
        assert!(board.wire.now() - before >= 200);
    }

    #[test]
    fn test_watchpoint_pulse_and_reversed_pins() {
        let board = outputs(true);
        let before = board.wire.now();
        board.monitor.watchpoint(0);
        board.monitor.watchpoint(5);
        assert_eq!(board.codepoint_writes(), vec![0b10, 0]);
        assert_eq!(board.wire.now() - before, 32 + 150);
    }

    #[test]
    fn test_codepoint_entry_points_respect_mode() {
        let board = SimBoard::new(MonitorConfig::default()).unwrap();
        board.monitor.init();
        board.monitor.watchpoint(0);
        board.monitor.passive_breakpoint(0);
        assert!(board.codepoint_writes().is_empty());
    }

    #[test]
    fn test_disabled_breakpoints_do_not_stop() {
        let board = SimBoard::new(MonitorConfig::default()).unwrap();
        board.monitor.init();
        board.monitor.internal_breakpoint(3);
        board.monitor.internal_breakpoint(40);
        board.monitor.external_breakpoint(1);
        crate::edb_assert!(board.monitor, 1 + 1 == 2);
        assert!(board.host.try_next_pulse().is_none());
    }
}
