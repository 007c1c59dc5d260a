//! Target side of the signal line.
//!
//! Two wire forms:
//!
//! * bare pulse: high, low, release.
//! * encoded pulse: a start pulse, one fixed-width slot per payload bit
//!   (most significant first, a pulse in the slot means `1`), then a
//!   terminating pulse one slot later.
//!
//! The encoded form runs with interrupts disabled (the caller holds the
//! device lock) and has the same duration for every payload.

use crate::hal::{CycleDelay, SignalPin};
use crate::protocol::SIG_SERIAL_NUM_BITS;

/// Signal pin plus the delay source that times the encoded form.
pub struct SignalLine {
    pin: Box<dyn SignalPin>,
    delay: Box<dyn CycleDelay>,
    bit_cycles: u32,
}

impl SignalLine {
    /// Wrap the pin; `bit_cycles` is the width of one encoded bit slot.
    pub fn new(pin: Box<dyn SignalPin>, delay: Box<dyn CycleDelay>, bit_cycles: u32) -> Self {
        Self { pin, delay, bit_cycles }
    }

    /// Float the line and drop any edge latched while doing so.
    pub fn init(&mut self) {
        self.pin.set_driven(false);
        self.pin.clear_edge_flag();
    }

    /// Level currently seen on the line.
    pub fn is_high(&self) -> bool {
        self.pin.is_high()
    }

    /// An unmasked edge is waiting to be serviced.
    pub fn edge_pending(&self) -> bool {
        self.pin.edge_pending()
    }

    /// Listen for the debugger's next rising edge.
    pub fn unmask(&mut self) {
        self.pin.select_rising_edge();
        self.pin.clear_edge_flag();
        self.pin.enable_edge_interrupt(true);
    }

    /// Stop listening and forget a latched edge.
    pub fn mask(&mut self) {
        self.pin.enable_edge_interrupt(false);
        self.pin.clear_edge_flag();
    }

    /// Bare pulse.
    pub fn pulse(&mut self) {
        self.pin.set_output(true);
        self.pin.set_driven(true);
        self.pin.set_output(false);
        self.pin.set_driven(false);
        // Our own pulse may have latched an edge.
        self.pin.clear_edge_flag();
    }

    /// Encoded pulse carrying the low [`SIG_SERIAL_NUM_BITS`] bits of `data`.
    pub fn pulse_with_data(&mut self, data: u8) {
        // Levels are computed up front so that each slot costs the same.
        let levels: [bool; SIG_SERIAL_NUM_BITS] = std::array::from_fn(|i| (data >> i) & 1 == 1);

        self.pin.set_output(true);
        self.pin.set_driven(true);
        self.pin.set_output(false);

        macro_rules! slot {
            ($line:ident, $levels:ident, $idx:literal) => {
                $line.delay.delay_cycles($line.bit_cycles);
                $line.pin.set_output($levels[$idx]);
                $line.pin.set_output(false);
            };
        }
        slot!(self, levels, 2);
        slot!(self, levels, 1);
        slot!(self, levels, 0);

        self.delay.delay_cycles(self.bit_cycles);
        self.pin.set_output(true);
        self.pin.set_output(false);

        self.pin.set_driven(false);
        self.pin.clear_edge_flag();
    }

    /// Spin on the same delay source the pulses use.
    pub fn delay_cycles(&mut self, cycles: u32) {
        self.delay.delay_cycles(cycles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Out(bool),
        Drive(bool),
        Rising,
        Clear,
        Enable(bool),
        Delay(u32),
    }

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<Op>>>);

    impl Log {
        fn take(&self) -> Vec<Op> {
            std::mem::take(&mut self.0.lock().unwrap())
        }
    }

    struct Pin(Log);
    struct Delay(Log);

    impl SignalPin for Pin {
        fn set_output(&mut self, high: bool) {
            self.0 .0.lock().unwrap().push(Op::Out(high));
        }
        fn set_driven(&mut self, driven: bool) {
            self.0 .0.lock().unwrap().push(Op::Drive(driven));
        }
        fn is_high(&self) -> bool {
            false
        }
        fn select_rising_edge(&mut self) {
            self.0 .0.lock().unwrap().push(Op::Rising);
        }
        fn clear_edge_flag(&mut self) {
            self.0 .0.lock().unwrap().push(Op::Clear);
        }
        fn enable_edge_interrupt(&mut self, enable: bool) {
            self.0 .0.lock().unwrap().push(Op::Enable(enable));
        }
        fn edge_pending(&self) -> bool {
            false
        }
    }

    impl CycleDelay for Delay {
        fn delay_cycles(&mut self, cycles: u32) {
            self.0 .0.lock().unwrap().push(Op::Delay(cycles));
        }
    }

    fn line() -> (SignalLine, Log) {
        let log = Log::default();
        let line = SignalLine::new(Box::new(Pin(log.clone())), Box::new(Delay(log.clone())), 128);
        (line, log)
    }

    #[test]
    fn test_bare_pulse_sequence() {
        let (mut line, log) = line();
        line.pulse();
        assert_eq!(
            log.take(),
            vec![Op::Out(true), Op::Drive(true), Op::Out(false), Op::Drive(false), Op::Clear]
        );
    }

    #[test]
    fn test_encoded_pulse_is_msb_first() {
        let (mut line, log) = line();
        line.pulse_with_data(0b110);
        let ops = log.take();
        let slots: Vec<Op> = ops
            .iter()
            .copied()
            .filter(|op| matches!(op, Op::Out(_)))
            .collect();
        assert_eq!(
            slots,
            vec![
                Op::Out(true),
                Op::Out(false),
                Op::Out(true),
                Op::Out(false),
                Op::Out(true),
                Op::Out(false),
                Op::Out(false),
                Op::Out(false),
                Op::Out(true),
                Op::Out(false),
            ]
        );
    }

    #[test]
    fn test_encoded_pulse_shape_does_not_depend_on_payload() {
        let (mut line, log) = line();
        let shape = |ops: Vec<Op>| -> Vec<Op> {
            ops.into_iter()
                .map(|op| if let Op::Out(_) = op { Op::Out(false) } else { op })
                .collect()
        };
        line.pulse_with_data(0);
        let zero = shape(log.take());
        for data in 1..8 {
            line.pulse_with_data(data);
            assert_eq!(shape(log.take()), zero, "payload {data}");
        }
        let delays = zero.iter().filter(|op| **op == Op::Delay(128)).count();
        assert_eq!(delays, SIG_SERIAL_NUM_BITS + 1);
    }

    #[test]
    fn test_mask_and_unmask() {
        let (mut line, log) = line();
        line.unmask();
        line.mask();
        assert_eq!(
            log.take(),
            vec![Op::Rising, Op::Clear, Op::Enable(true), Op::Enable(false), Op::Clear]
        );
    }
}
