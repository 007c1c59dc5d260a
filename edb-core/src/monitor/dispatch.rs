//! Command loop and command table.

use super::{DebugFlags, Monitor};
use crate::protocol::{
    address_bytes, address_from_bytes, Command, CommandDescriptor, CommandParser, ReplyBuffer,
    ResponseDescriptor, ADDRESS_SIZE, MAX_READ_LEN,
};
use std::sync::PoisonError;

/// Producer behind `GetAppOutput`: fills the slice, returns the byte count.
pub type AppOutputFn = Box<dyn FnMut(&mut [u8]) -> usize + Send>;

/// Number of internal breakpoints the mask can hold.
pub const BREAKPOINT_COUNT: u8 = u16::BITS as u8;

/// Command loop state that lives across debug sessions.
pub(crate) struct Session {
    parser: CommandParser,
    reply: ReplyBuffer,
    chunk: Vec<u8>,
}

impl Session {
    pub(crate) fn new(chunk_bytes: usize) -> Self {
        Self { parser: CommandParser::new(), reply: ReplyBuffer::new(), chunk: vec![0; chunk_bytes] }
    }
}

impl Monitor {
    /// Serve debugger commands until one of them asks to return.
    pub(super) fn debug_main(&self) {
        self.lock().indicator.set_debug_led(true);
        log::info!("command loop started");

        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let session = &mut *guard;

        'serve: loop {
            self.transport.receive(&mut session.chunk);
            for &byte in &session.chunk {
                if let Some(cmd) = session.parser.push(byte) {
                    self.execute_cmd(&mut session.reply, &cmd);
                }
                if self.take_return_request() {
                    break 'serve;
                }
            }
        }

        drop(guard);
        log::info!("command loop finished");
        self.lock().indicator.set_debug_led(false);
    }

    fn take_return_request(&self) -> bool {
        let mut core = self.lock();
        let requested = core.flags.contains(DebugFlags::RETURN_REQUESTED);
        core.flags.remove(DebugFlags::RETURN_REQUESTED);
        requested
    }

    fn execute_cmd(&self, reply: &mut ReplyBuffer, cmd: &Command) {
        let descriptor = match CommandDescriptor::try_from(cmd.descriptor) {
            Ok(descriptor) => descriptor,
            Err(raw) => {
                log::debug!("ignoring unknown command 0x{raw:02X}");
                return;
            }
        };
        log::trace!("{descriptor:?} {:02X?}", cmd.payload());

        let data = cmd.payload();
        match descriptor {
            CommandDescriptor::GetPc => {
                let pc = self.lock().pc;
                reply.start(ResponseDescriptor::Address).extend(&address_bytes(pc));
            }
            CommandDescriptor::ExamineMemory => {
                log::debug!("ExamineMemory is reserved");
                return;
            }
            CommandDescriptor::ReadMem => {
                let (Some(address), Some(&len)) =
                    (address_from_bytes(data), data.get(ADDRESS_SIZE))
                else {
                    log::debug!("short ReadMem payload");
                    return;
                };
                let len = usize::from(len).min(MAX_READ_LEN);
                reply.start(ResponseDescriptor::Memory).extend(&address_bytes(address));
                for offset in 0..len as u32 {
                    reply.push(self.memory.read_byte(address.wrapping_add(offset)));
                }
            }
            CommandDescriptor::WriteMem => {
                let (Some(address), Some(&len)) =
                    (address_from_bytes(data), data.get(ADDRESS_SIZE))
                else {
                    log::debug!("short WriteMem payload");
                    return;
                };
                let values = &data[ADDRESS_SIZE + 1..];
                let len = usize::from(len).min(values.len());
                for (offset, &value) in values[..len].iter().enumerate() {
                    self.memory.write_byte(address.wrapping_add(offset as u32), value);
                }
                reply
                    .start(ResponseDescriptor::Memory)
                    .extend(&address_bytes(address))
                    .push(self.memory.read_byte(address));
            }
            CommandDescriptor::Breakpoint => {
                let &[index, enable, ..] = data else {
                    log::debug!("short Breakpoint payload");
                    return;
                };
                self.set_internal_breakpoint(index, enable != 0);
                reply.start(ResponseDescriptor::BreakpointAck);
            }
            CommandDescriptor::ExitActiveDebug => {
                self.exit_debug_mode();
                self.lock().flags.insert(DebugFlags::RETURN_REQUESTED);
                return;
            }
            CommandDescriptor::GetInterruptContext => {
                let context = self.lock().context;
                let [id_lo, id_hi] = context.id.to_le_bytes();
                reply
                    .start(ResponseDescriptor::InterruptContext)
                    .extend(&[context.kind as u8, id_lo, id_hi]);
            }
            CommandDescriptor::SerialEcho => {
                let value = data.first().copied().unwrap_or_default();
                // The command loop only runs with the line masked; it is
                // armed again by the edge handler once the session ends.
                let mut core = self.lock();
                core.signal.mask();
                if self.config.target_side_requests {
                    core.signal.pulse_with_data(value);
                } else {
                    core.signal.pulse();
                }
                drop(core);
                reply.start(ResponseDescriptor::SerialEchoAck);
            }
            CommandDescriptor::GetAppOutput => {
                reply.start(ResponseDescriptor::AppOutput);
                let written = self
                    .app_output
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_mut()
                    .map_or(0, |producer| producer(reply.spare()));
                reply.commit(written);
            }
        }

        self.transport.send(reply.finish());
    }

    fn set_internal_breakpoint(&self, index: u8, enable: bool) {
        if index >= BREAKPOINT_COUNT {
            log::debug!("breakpoint index {index} out of range");
            return;
        }
        let mut core = self.lock();
        let bit = 1u16 << index;
        let mask = if enable { core.breakpoints | bit } else { core.breakpoints & !bit };
        core.breakpoints = mask;
        if let Err(err) = core.nv.store(mask) {
            log::warn!("failed to persist breakpoint mask: {err}");
        }
    }
}
