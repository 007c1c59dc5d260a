//! Simulated target board.
//!
//! [`SimBoard`] wires a [`Monitor`] to simulated peripherals and hands the
//! other end of every wire to a [`HostDebugger`]. Application code runs on
//! threads started with [`SimBoard::spawn_app`].

mod host;
mod memory;
mod serial;
mod signal;

pub use host::{HostDebugger, DEFAULT_TIMEOUT};
pub use memory::{FileNvStore, RamNvStore, SimMemory};
pub use serial::{serial_pair, HostSerial, SimSerial};
pub use signal::{decode_pulse, Pulse, SignalWire, SimDelay, SimSignalPin};

use crate::config::MonitorConfig;
use crate::hal::{CodepointPort, EdgeHandler, NvStore, ProgramCounter, StateIndicator};
use crate::monitor::{DebugState, Monitor, Peripherals};
use crate::transport::{InterruptThread, UartDriver};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

/// Number of codepoint lines on the simulated board.
pub const CODEPOINT_LINES: u8 = 2;

#[derive(Debug, Default)]
struct CodepointState {
    inputs: u8,
    writes: Vec<u8>,
}

/// Codepoint lines; the host side sets inputs and reads back writes.
#[derive(Debug, Clone, Default)]
pub struct SimCodepoints(Arc<Mutex<CodepointState>>);

impl SimCodepoints {
    fn with<T>(&self, f: impl FnOnce(&mut CodepointState) -> T) -> T {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl CodepointPort for SimCodepoints {
    fn line_count(&self) -> u8 {
        CODEPOINT_LINES
    }

    fn configure(&mut self, output: bool, pull_down: bool) {
        log::trace!("codepoints: output={output} pull_down={pull_down}");
    }

    fn read(&self) -> u8 {
        self.with(|state| state.inputs)
    }

    fn write(&mut self, bits: u8) {
        self.with(|state| state.writes.push(bits));
    }
}

#[derive(Debug, Default)]
struct IndicatorState {
    states: Vec<u8>,
    led: Vec<bool>,
}

/// Records everything shown on the state pins and the debug LED.
#[derive(Debug, Clone, Default)]
pub struct SimIndicator(Arc<Mutex<IndicatorState>>);

impl SimIndicator {
    fn with<T>(&self, f: impl FnOnce(&mut IndicatorState) -> T) -> T {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl StateIndicator for SimIndicator {
    fn show_state(&mut self, code: u8) {
        self.with(|state| state.states.push(code));
    }

    fn set_debug_led(&mut self, on: bool) {
        self.with(|state| state.led.push(on));
    }
}

/// Program counter the test sets.
#[derive(Debug, Clone, Default)]
pub struct SimCpu(Arc<AtomicU32>);

impl ProgramCounter for SimCpu {
    fn program_counter(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A target running the monitor on simulated hardware, plus its debugger.
pub struct SimBoard {
    /// The monitor under test.
    pub monitor: Arc<Monitor>,
    /// The debugger end of the wires.
    pub host: HostDebugger,
    /// Signal line.
    pub wire: Arc<SignalWire>,
    /// Target memory.
    pub memory: Arc<SimMemory>,
    /// Serial driver, for poking at transport state.
    pub driver: Arc<UartDriver<SimSerial>>,
    cpu: SimCpu,
    codepoints: SimCodepoints,
    indicator: SimIndicator,
    _uart_irq: InterruptThread,
}

impl SimBoard {
    /// Board with a fresh breakpoint store.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        Self::with_store(config, Box::new(RamNvStore::new()))
    }

    /// Board whose breakpoint mask lives in `nv`. Reusing a store across
    /// boards models a reboot.
    pub fn with_store(config: MonitorConfig, nv: Box<dyn NvStore>) -> Result<Self> {
        let (port, host_serial) = serial_pair();
        let driver = Arc::new(UartDriver::new(port, config.uart));
        let uart_irq = InterruptThread::spawn(driver.clone())?;

        let (wire, pulses) = SignalWire::new(config.timing.sig_bit_cycles);
        let memory = Arc::new(SimMemory::new());
        let cpu = SimCpu::default();
        let codepoints = SimCodepoints::default();
        let indicator = SimIndicator::default();

        let peripherals = Peripherals {
            signal: Box::new(SimSignalPin(wire.clone())),
            delay: Box::new(SimDelay(wire.clone())),
            codepoints: Box::new(codepoints.clone()),
            indicator: Box::new(indicator.clone()),
            cpu: Box::new(cpu.clone()),
            memory: memory.clone(),
            nv,
            transport: driver.clone(),
        };
        let monitor = Arc::new(Monitor::new(peripherals, config)?);
        let handler: Arc<dyn EdgeHandler> = monitor.clone();
        let handler: Weak<dyn EdgeHandler> = Arc::downgrade(&handler);
        wire.attach(handler);

        Ok(Self {
            monitor,
            host: HostDebugger::new(host_serial, pulses, wire.clone()),
            wire,
            memory,
            driver,
            cpu,
            codepoints,
            indicator,
            _uart_irq: uart_irq,
        })
    }

    /// Run application code on its own thread.
    pub fn spawn_app<T, F>(&self, app: F) -> Result<thread::JoinHandle<T>>
    where
        F: FnOnce(&Monitor) -> T + Send + 'static,
        T: Send + 'static,
    {
        let monitor = self.monitor.clone();
        thread::Builder::new()
            .name("app".into())
            .spawn(move || app(&monitor))
            .map_err(|source| Error::Spawn { name: "app", source })
    }

    /// Set the program counter the next interrupt captures.
    pub fn set_program_counter(&self, pc: u32) {
        self.cpu.0.store(pc, Ordering::Relaxed);
    }

    /// Drive the codepoint inputs from the debugger side.
    pub fn set_codepoint_inputs(&self, bits: u8) {
        self.codepoints.with(|state| state.inputs = bits);
    }

    /// Every value the target wrote to the codepoint lines.
    pub fn codepoint_writes(&self) -> Vec<u8> {
        self.codepoints.with(|state| state.writes.clone())
    }

    /// Every state the target went through, oldest first.
    pub fn state_history(&self) -> Vec<DebugState> {
        self.indicator
            .with(|state| state.states.iter().filter_map(|&code| DebugState::from_code(code)).collect())
    }

    /// Every debug LED change.
    pub fn debug_led_history(&self) -> Vec<bool> {
        self.indicator.with(|state| state.led.clone())
    }
}
