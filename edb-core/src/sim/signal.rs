//! Simulated signal line with a virtual cycle clock.
//!
//! The target side records the time of every rising edge it drives. When it
//! releases the line, the edges are decoded into a [`Pulse`] for the host.
//! Every pin write costs one cycle and delays advance the clock by their
//! length, so slot positions come out the way they would on hardware.

use crate::hal::{CycleDelay, EdgeHandler, SignalPin};
use crate::protocol::SIG_SERIAL_NUM_BITS;
use crate::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

/// A decoded target pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// Single pulse, no payload.
    Bare,
    /// Encoded pulse with its payload bits.
    Encoded(u8),
}

/// Pin writes per encoded slot on top of its delay: raise and lower.
pub const SLOT_WRITE_TICKS: u64 = 2;

/// Decode rising-edge times of one pulse train.
///
/// A slot lasts `bit_cycles` plus the pin writes it performs, so the slot
/// pitch is [`SLOT_WRITE_TICKS`] longer than the configured width.
pub fn decode_pulse(rises: &[u64], bit_cycles: u32) -> Option<Pulse> {
    let (&start, rest) = rises.split_first()?;
    if rest.is_empty() {
        return Some(Pulse::Bare);
    }
    let slot = u64::from(bit_cycles) + SLOT_WRITE_TICKS;
    let bits = SIG_SERIAL_NUM_BITS as u64;
    let value = rest.iter().fold(0u8, |value, &t| {
        let k = (t - start + slot / 2) / slot;
        if (1..=bits).contains(&k) {
            value | 1 << (bits - k)
        } else {
            value
        }
    });
    Some(Pulse::Encoded(value))
}

#[derive(Default)]
struct WireState {
    out: bool,
    driven: bool,
    host_high: bool,
    edge_enabled: bool,
    edge_flag: bool,
    clock: u64,
    rises: Vec<u64>,
}

impl WireState {
    const fn level(&self) -> bool {
        if self.driven {
            self.out
        } else {
            self.host_high
        }
    }

    fn tick(&mut self) {
        self.clock += 1;
    }
}

/// The line itself, shared by the target pin and the host.
pub struct SignalWire {
    state: Mutex<WireState>,
    armed: Condvar,
    pulses: Sender<Pulse>,
    handler: Mutex<Option<Weak<dyn EdgeHandler>>>,
    bit_cycles: u32,
}

impl SignalWire {
    /// A wire decoding encoded pulses with `bit_cycles` slots, and the
    /// receiver of decoded target pulses.
    pub fn new(bit_cycles: u32) -> (Arc<Self>, Receiver<Pulse>) {
        let (pulses, rx) = unbounded();
        let wire = Arc::new(Self {
            state: Mutex::new(WireState::default()),
            armed: Condvar::new(),
            pulses,
            handler: Mutex::new(None),
            bit_cycles,
        });
        (wire, rx)
    }

    fn lock(&self) -> MutexGuard<'_, WireState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route host edges to `handler`.
    pub fn attach(&self, handler: Weak<dyn EdgeHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Virtual time in target cycles.
    pub fn now(&self) -> u64 {
        self.lock().clock
    }

    /// The target listens for edges.
    pub fn is_armed(&self) -> bool {
        self.lock().edge_enabled
    }

    /// Hold the line high from the host side, or let it go.
    pub fn hold_high(&self, high: bool) {
        self.lock().host_high = high;
    }

    /// Drive a rising edge toward the target.
    ///
    /// Waits until the target listens, as the debugger would only react to
    /// what the target just told it. The interrupt runs on its own thread.
    pub fn raise_edge(&self, timeout: Duration) -> Result<()> {
        let state = self.lock();
        let (mut state, wait) = self
            .armed
            .wait_timeout_while(state, timeout, |state| !state.edge_enabled)
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() {
            return Err(Error::Timeout { what: "target to arm the signal line", timeout });
        }
        state.tick();
        state.edge_flag = true;
        drop(state);

        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(Error::Disconnected)?;
        thread::Builder::new()
            .name("edb-sig-isr".into())
            .spawn(move || handler.on_signal_edge())
            .map_err(|source| Error::Spawn { name: "edb-sig-isr", source })?;
        Ok(())
    }
}

/// Target pin on a [`SignalWire`].
pub struct SimSignalPin(pub Arc<SignalWire>);

impl SignalPin for SimSignalPin {
    fn set_output(&mut self, high: bool) {
        let mut state = self.0.lock();
        state.tick();
        let was = state.level();
        state.out = high;
        if state.driven && !was && state.level() {
            let now = state.clock;
            state.rises.push(now);
            state.edge_flag = true;
        }
    }

    fn set_driven(&mut self, driven: bool) {
        let mut state = self.0.lock();
        state.tick();
        let was = state.level();
        let released = state.driven && !driven;
        state.driven = driven;
        if driven && !was && state.level() {
            let now = state.clock;
            state.rises.push(now);
            state.edge_flag = true;
        }
        if released {
            let rises = std::mem::take(&mut state.rises);
            drop(state);
            if let Some(pulse) = decode_pulse(&rises, self.0.bit_cycles) {
                log::trace!("target pulse {pulse:?}");
                let _ = self.0.pulses.send(pulse);
            }
        }
    }

    fn is_high(&self) -> bool {
        self.0.lock().level()
    }

    fn select_rising_edge(&mut self) {
        self.0.lock().tick();
    }

    fn clear_edge_flag(&mut self) {
        self.0.lock().edge_flag = false;
    }

    fn enable_edge_interrupt(&mut self, enable: bool) {
        self.0.lock().edge_enabled = enable;
        self.0.armed.notify_all();
    }

    fn edge_pending(&self) -> bool {
        let state = self.0.lock();
        state.edge_enabled && state.edge_flag
    }
}

/// Busy wait that advances the wire clock.
pub struct SimDelay(pub Arc<SignalWire>);

impl CycleDelay for SimDelay {
    fn delay_cycles(&mut self, cycles: u32) {
        self.0.lock().clock += u64::from(cycles);
    }
}
