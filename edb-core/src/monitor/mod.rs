//! Debug-mode state machine.
//!
//! The [`Monitor`] is the one device context of a target: state, interrupt
//! context, flags and the peripherals the state machine drives all live
//! behind one lock.
//!
//! In the hosted build:
//!
//! * holding the device lock means interrupts are disabled;
//! * a low-power wait is a condition-variable wait on a predicate under that
//!   lock, so an edge cannot slip in between deciding to sleep and sleeping;
//! * every signal edge runs [`Monitor::on_signal_edge`] on its own thread,
//!   which lets an edge nest inside a handler that is asleep.
//!
//! Transitions: Idle to Debug (edge), Debug to Debug (nested request),
//! Debug to Suspended (command loop done or energy guard left), Suspended
//! to Idle (edge).

mod dispatch;

pub use dispatch::{AppOutputFn, BREAKPOINT_COUNT};

use crate::config::{CodepointMode, MonitorConfig};
use crate::console::Console;
use crate::hal::{
    CodepointPort, CycleDelay, EdgeHandler, NvStore, ProgramCounter, SignalPin, StateIndicator,
    TargetMemory,
};
use crate::protocol::{
    Features, InterruptContext, InterruptType, ReplyBuffer, ResponseDescriptor, SignalCommand,
};
use crate::signal::SignalLine;
use crate::transport::Transport;
use crate::Result;
use bitflags::bitflags;
use dispatch::Session;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Where the monitor is in the debug-mode sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugState {
    /// Application running.
    #[default]
    Idle,
    /// Monitor active.
    Debug,
    /// Waiting for the debugger to restore energy.
    Suspended,
}

impl DebugState {
    /// Value shown on the state indicator.
    pub const fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Debug => 1,
            Self::Suspended => 2,
        }
    }

    /// Decode an indicator value.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::Debug),
            2 => Some(Self::Suspended),
            _ => None,
        }
    }
}

bitflags! {
    /// Transient bits coordinating sleeps and wakeups.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u8 {
        /// The command loop should return.
        const RETURN_REQUESTED = 0x01;
        /// The foreground asked for debug mode and sleeps until it is over.
        const REQUESTED_BY_TARGET = 0x02;
    }
}

/// Hardware handed to the monitor.
pub struct Peripherals {
    /// Signal line to the debugger.
    pub signal: Box<dyn SignalPin>,
    /// Cycle-accurate busy wait.
    pub delay: Box<dyn CycleDelay>,
    /// Breakpoint and watchpoint lines.
    pub codepoints: Box<dyn CodepointPort>,
    /// State pins and debug LED.
    pub indicator: Box<dyn StateIndicator>,
    /// Program counter source.
    pub cpu: Box<dyn ProgramCounter>,
    /// Application memory.
    pub memory: Arc<dyn TargetMemory>,
    /// Home of the internal breakpoint mask.
    pub nv: Box<dyn NvStore>,
    /// Command and console transport.
    pub transport: Arc<dyn Transport>,
}

pub(crate) struct Core {
    pub(crate) state: DebugState,
    pub(crate) context: InterruptContext,
    pub(crate) flags: DebugFlags,
    pub(crate) pc: u32,
    pub(crate) breakpoints: u16,
    isr_depth: usize,
    pub(crate) signal: SignalLine,
    pub(crate) codepoints: Box<dyn CodepointPort>,
    pub(crate) indicator: Box<dyn StateIndicator>,
    cpu: Box<dyn ProgramCounter>,
    pub(crate) nv: Box<dyn NvStore>,
}

impl Core {
    fn set_state(&mut self, state: DebugState) {
        log::debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
        self.indicator.show_state(state.code());
    }
}

/// The on-target debug monitor.
pub struct Monitor {
    core: Mutex<Core>,
    wake: Condvar,
    session: Mutex<Session>,
    app_output: Mutex<Option<AppOutputFn>>,
    transport: Arc<dyn Transport>,
    memory: Arc<dyn TargetMemory>,
    console: Console,
    config: MonitorConfig,
}

impl Monitor {
    /// Build the monitor. The breakpoint mask is loaded from `nv`.
    pub fn new(peripherals: Peripherals, config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let Peripherals { signal, delay, codepoints, indicator, cpu, memory, nv, transport } =
            peripherals;
        let breakpoints = nv.load()?;
        log::debug!("breakpoint mask 0x{breakpoints:04X}");

        Ok(Self {
            core: Mutex::new(Core {
                state: DebugState::Idle,
                context: InterruptContext::default(),
                flags: DebugFlags::empty(),
                pc: 0,
                breakpoints,
                isr_depth: 0,
                signal: SignalLine::new(signal, delay, config.timing.sig_bit_cycles),
                codepoints,
                indicator,
                cpu,
                nv,
            }),
            wake: Condvar::new(),
            session: Mutex::new(Session::new(config.rx_chunk_bytes)),
            app_output: Mutex::new(None),
            console: Console::new(transport.clone()),
            transport,
            memory,
            config,
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep_while<'a>(
        &self,
        core: MutexGuard<'a, Core>,
        condition: impl FnMut(&mut Core) -> bool,
    ) -> MutexGuard<'a, Core> {
        self.wake.wait_while(core, condition).unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for foreground work: application code does not run while an
    /// edge handler is active.
    fn foreground(&self) -> MutexGuard<'_, Core> {
        self.sleep_while(self.lock(), |core| core.isr_depth > 0)
    }

    /// Configuration in use.
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Console and application data relay.
    pub const fn console(&self) -> &Console {
        &self.console
    }

    /// Current state.
    pub fn state(&self) -> DebugState {
        self.lock().state
    }

    /// Why the current debug mode was entered.
    pub fn interrupt_context(&self) -> InterruptContext {
        self.lock().context
    }

    /// Program counter captured when the application was last interrupted.
    pub fn saved_program_counter(&self) -> u32 {
        self.lock().pc
    }

    /// Enabled internal breakpoints, bit `i` for index `i`.
    pub fn breakpoint_mask(&self) -> u16 {
        self.lock().breakpoints
    }

    /// Register the producer behind the `GetAppOutput` command. It fills
    /// the slice it is given and returns how many bytes it wrote.
    pub fn set_app_output(&self, producer: impl FnMut(&mut [u8]) -> usize + Send + 'static) {
        *self.app_output.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(producer));
    }

    /// Stop and wait while an edge handler runs.
    ///
    /// Application threads call this between steps; on hardware the
    /// interrupt simply preempts them.
    pub fn preemption_point(&self) {
        drop(self.foreground());
    }

    /// Boot-time setup. Blocks for a whole debug session if the debugger
    /// holds the signal line high.
    pub fn init(&self) {
        let mut core = self.lock();
        core.indicator.set_debug_led(false);
        core.signal.init();

        let outputs = self.config.codepoints == CodepointMode::Outputs;
        let pull_down = self.config.pull_down_codepoints;
        core.codepoints.configure(outputs, pull_down && !outputs);

        core.set_state(DebugState::Idle);

        if core.signal.is_high() {
            drop(core);
            log::info!("debugger requested debug mode on boot");
            self.send_interrupted_msg();
        } else {
            core.signal.unmask();
        }
    }

    /// Tell the debugger we saw its boot request, then sleep until the
    /// session it starts is over.
    ///
    /// The line is held high by the debugger, so the notification goes over
    /// the transport instead.
    fn send_interrupted_msg(&self) {
        let mut core = self.lock();
        core.flags.insert(DebugFlags::REQUESTED_BY_TARGET);
        core.context = InterruptContext {
            kind: InterruptType::DebuggerRequest,
            id: 0,
            features: Features::FULL,
        };
        core.signal.unmask();
        drop(core);

        self.transport.init();
        let mut reply = ReplyBuffer::new();
        reply.start(ResponseDescriptor::Interrupted);
        self.transport.send(reply.finish());

        let core = self.lock();
        drop(self.sleep_while(core, |core| core.flags.contains(DebugFlags::REQUESTED_BY_TARGET)));
    }

    /// Ask the debugger for debug mode and sleep until it is over (or, for a
    /// non-interactive request, until the debugger took over power).
    pub fn request_debug_mode(&self, kind: InterruptType, id: u16, features: Features) {
        if !self.config.target_side_requests {
            log::debug!("target-side request {kind:?} ignored");
            return;
        }

        let mut core = self.foreground();
        core.flags.insert(DebugFlags::REQUESTED_BY_TARGET);
        core.context = InterruptContext { kind, id, features };

        core.signal.mask();
        if core.state == DebugState::Debug {
            // Nested inside an energy guard: the debugger already considers
            // us in debug mode and needs the intent spelled out.
            core.signal.pulse_with_data(SignalCommand::Interrupt as u8);
        } else {
            core.signal.pulse();
        }
        core.signal.unmask();

        drop(self.sleep_while(core, |core| core.flags.contains(DebugFlags::REQUESTED_BY_TARGET)));
    }

    /// Debug mode with the transport up, but no command loop.
    pub fn request_non_interactive_debug_mode(&self) {
        self.request_debug_mode(InterruptType::EnergyGuard, 0, Features::WITH_TRANSPORT);
    }

    /// Enter an energy guard.
    pub fn request_energy_guard_debug_mode(&self) {
        self.request_debug_mode(InterruptType::EnergyGuard, 0, Features::WITH_TRANSPORT);
    }

    /// Leave a non-interactive debug mode and sleep until the debugger
    /// restored the energy level.
    pub fn resume_application(&self) {
        if !self.config.target_side_requests {
            log::debug!("resume ignored, target-side requests disabled");
            return;
        }

        self.exit_debug_mode();

        let mut core = self.foreground();
        core.set_state(DebugState::Suspended);
        core.signal.mask();
        core.signal.pulse_with_data(SignalCommand::Exit as u8);
        core.signal.unmask();

        drop(self.sleep_while(core, |core| core.state == DebugState::Suspended));
    }

    /// Shut down what debug mode started and forget why it was entered.
    pub(crate) fn exit_debug_mode(&self) {
        let features = {
            let mut core = self.lock();
            let features = core.context.features;
            core.context.clear();
            features
        };
        if features.contains(Features::WITH_TRANSPORT) {
            self.transport.teardown();
        }
    }

    fn enter_debug_mode<'a>(&'a self, core: MutexGuard<'a, Core>) -> MutexGuard<'a, Core> {
        let features = core.context.features;
        drop(core);

        if features.contains(Features::WITH_TRANSPORT) {
            self.transport.init();
        }

        let mut core = self.lock();
        core.set_state(DebugState::Debug);
        core
    }

    fn handle_debugger_signal<'a>(&'a self, mut core: MutexGuard<'a, Core>) -> MutexGuard<'a, Core> {
        match core.state {
            DebugState::Idle | DebugState::Debug => {
                if core.context.kind == InterruptType::None {
                    core.context.kind = InterruptType::DebuggerRequest;
                    core.context.features = Features::FULL;
                }

                core = self.enter_debug_mode(core);

                let context = core.context;
                if self.config.target_side_requests
                    && context.kind != InterruptType::DebuggerRequest
                {
                    core.signal.pulse_with_data(context.features.bits());
                } else {
                    core.signal.pulse();
                }

                if context.features.contains(Features::INTERACTIVE) {
                    drop(core);
                    self.debug_main();
                    core = self.lock();
                    core.set_state(DebugState::Suspended);
                    // Armed again only right before sleeping in Suspended.
                    core.signal.mask();
                    core.signal.pulse();
                }
            }
            DebugState::Suspended => core.set_state(DebugState::Idle),
        }
        core
    }
}

impl EdgeHandler for Monitor {
    /// Signal line interrupt.
    fn on_signal_edge(&self) {
        let mut core = self.lock();
        if !core.signal.edge_pending() {
            log::trace!("edge no longer pending");
            return;
        }
        core.isr_depth += 1;

        if core.state == DebugState::Idle {
            core.pc = core.cpu.program_counter();
        }

        core.signal.mask();
        core = self.handle_debugger_signal(core);

        match core.state {
            DebugState::Debug => {
                // Entered an energy guard. The line stays masked until the
                // application leaves the guard.
                core.flags.remove(DebugFlags::REQUESTED_BY_TARGET);
            }
            DebugState::Suspended => {
                core.signal.unmask();
                // The Suspended to Idle edge nests in here.
                core = self.sleep_while(core, |core| core.state == DebugState::Suspended);
                core.flags.remove(DebugFlags::REQUESTED_BY_TARGET);
            }
            DebugState::Idle => core.signal.unmask(),
        }

        core.isr_depth -= 1;
        drop(core);
        self.wake.notify_all();
    }
}
