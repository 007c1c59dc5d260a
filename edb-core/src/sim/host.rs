//! The debugger end of a simulated target.

use super::serial::HostSerial;
use super::signal::{Pulse, SignalWire};
use crate::protocol::{
    address_from_bytes, read_mem_payload, write_mem_payload, CommandDescriptor,
    Frame, InterruptType, ResponseDescriptor, SignalCommand, ADDRESS_SIZE, HEADER_SIZE, IDENTIFIER,
};
use crate::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// How long the host waits for the target by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Plays the debugger: talks commands over the serial wire and pulses over
/// the signal wire.
pub struct HostDebugger {
    serial: HostSerial,
    pulses: Receiver<Pulse>,
    wire: Arc<SignalWire>,
    timeout: Duration,
}

impl HostDebugger {
    /// Host on the given wires.
    pub fn new(serial: HostSerial, pulses: Receiver<Pulse>, wire: Arc<SignalWire>) -> Self {
        Self { serial, pulses, wire, timeout: DEFAULT_TIMEOUT }
    }

    /// Change how long every wait may take.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send one framed command.
    pub fn send_command(&self, descriptor: CommandDescriptor, payload: &[u8]) {
        log::debug!("host -> {descriptor:?} {}", hex::encode(payload));
        self.serial.write(&Frame::command(descriptor, payload).encode());
    }

    /// Send raw bytes, framed or not.
    pub fn send_raw(&self, bytes: &[u8]) {
        self.serial.write(bytes);
    }

    /// Next byte from the target.
    pub fn recv_byte(&self) -> Result<u8> {
        self.serial.read_byte(self.timeout)
    }

    /// A byte, if the target already sent one.
    pub fn try_recv_byte(&self) -> Option<u8> {
        self.serial.try_read_byte()
    }

    /// Next framed message from the target.
    pub fn recv_frame(&self) -> Result<Frame> {
        let identifier = self.recv_byte()?;
        if identifier != IDENTIFIER {
            return Err(Error::BadIdentifier(identifier));
        }
        let header = self.serial.read_exact(HEADER_SIZE - 1, self.timeout)?;
        let payload = self.serial.read_exact(usize::from(header[1]), self.timeout)?;
        let frame = Frame::new(header[0], &payload);
        log::debug!("host <- {:?} {}", frame.response(), hex::encode(&frame.payload));
        Ok(frame)
    }

    /// Next framed message, which must be a `descriptor` reply.
    pub fn expect_frame(&self, descriptor: ResponseDescriptor) -> Result<Frame> {
        let frame = self.recv_frame()?;
        if frame.response() == Some(descriptor) {
            Ok(frame)
        } else {
            Err(Error::Unexpected(format!(
                "reply 0x{:02X}, wanted {descriptor:?}",
                frame.descriptor
            )))
        }
    }

    /// Next pulse from the target.
    pub fn next_pulse(&self) -> Result<Pulse> {
        self.pulses.recv_timeout(self.timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => {
                Error::Timeout { what: "signal pulse", timeout: self.timeout }
            }
            RecvTimeoutError::Disconnected => Error::Disconnected,
        })
    }

    /// A pulse, if the target already sent one.
    pub fn try_next_pulse(&self) -> Option<Pulse> {
        self.pulses.try_recv().ok()
    }

    /// Next pulse, which must be `expected`.
    pub fn expect_pulse(&self, expected: Pulse) -> Result<()> {
        let pulse = self.next_pulse()?;
        if pulse == expected {
            Ok(())
        } else {
            Err(Error::Unexpected(format!("pulse {pulse:?}, wanted {expected:?}")))
        }
    }

    /// Edge toward the target, once it listens.
    pub fn pulse(&self) -> Result<()> {
        self.wire.raise_edge(self.timeout)
    }

    /// Hold the signal line high (debug on boot) or release it.
    pub fn hold_high(&self, high: bool) {
        self.wire.hold_high(high);
    }

    /// Program counter at the time of the interrupt.
    pub fn get_pc(&self) -> Result<u32> {
        self.send_command(CommandDescriptor::GetPc, &[]);
        let frame = self.expect_frame(ResponseDescriptor::Address)?;
        address_from_bytes(&frame.payload)
            .ok_or_else(|| Error::Unexpected("short Address reply".into()))
    }

    /// Read target memory. At most [`crate::protocol::MAX_READ_LEN`] bytes
    /// come back.
    pub fn read_mem(&self, address: u32, len: u8) -> Result<Vec<u8>> {
        self.send_command(CommandDescriptor::ReadMem, &read_mem_payload(address, len));
        let mut frame = self.expect_frame(ResponseDescriptor::Memory)?;
        check_address(&frame, address)?;
        Ok(frame.payload.split_off(ADDRESS_SIZE))
    }

    /// Write target memory; returns the byte echoed from `address`.
    pub fn write_mem(&self, address: u32, data: &[u8]) -> Result<u8> {
        self.send_command(CommandDescriptor::WriteMem, &write_mem_payload(address, data));
        let frame = self.expect_frame(ResponseDescriptor::Memory)?;
        check_address(&frame, address)?;
        frame
            .payload
            .get(ADDRESS_SIZE)
            .copied()
            .ok_or_else(|| Error::Unexpected("write echo missing".into()))
    }

    /// Enable or disable an internal breakpoint.
    pub fn set_breakpoint(&self, index: u8, enable: bool) -> Result<()> {
        self.send_command(CommandDescriptor::Breakpoint, &[index, u8::from(enable)]);
        self.expect_frame(ResponseDescriptor::BreakpointAck).map(drop)
    }

    /// Why the target is in debug mode.
    pub fn interrupt_context(&self) -> Result<(InterruptType, u16)> {
        self.send_command(CommandDescriptor::GetInterruptContext, &[]);
        let frame = self.expect_frame(ResponseDescriptor::InterruptContext)?;
        match *frame.payload.as_slice() {
            [kind, lo, hi] => InterruptType::from_u8(kind)
                .map(|kind| (kind, u16::from_le_bytes([lo, hi])))
                .ok_or_else(|| Error::Unexpected(format!("interrupt type {kind}"))),
            _ => Err(Error::Unexpected("malformed InterruptContext reply".into())),
        }
    }

    /// Ask the target to echo `value` on the signal line; returns the pulse.
    pub fn serial_echo(&self, value: u8) -> Result<Pulse> {
        self.send_command(CommandDescriptor::SerialEcho, &[value]);
        let pulse = self.next_pulse()?;
        self.expect_frame(ResponseDescriptor::SerialEchoAck)?;
        Ok(pulse)
    }

    /// Pull buffered application output.
    pub fn app_output(&self) -> Result<Vec<u8>> {
        self.send_command(CommandDescriptor::GetAppOutput, &[]);
        Ok(self.expect_frame(ResponseDescriptor::AppOutput)?.payload)
    }

    /// Console text from the target.
    pub fn recv_stdio(&self) -> Result<Vec<u8>> {
        Ok(self.expect_frame(ResponseDescriptor::Stdio)?.payload)
    }

    /// Finish the debug-on-boot handshake: the target announced itself,
    /// release the line and take it into debug mode.
    pub fn attach_on_boot(&self) -> Result<()> {
        self.expect_frame(ResponseDescriptor::Interrupted)?;
        self.hold_high(false);
        self.pulse()?;
        self.expect_pulse(Pulse::Bare)
    }

    /// Interrupt a running target.
    pub fn interrupt(&self) -> Result<()> {
        self.pulse()?;
        self.expect_pulse(Pulse::Bare)
    }

    /// Answer a target's request for debug mode; returns the pulse the
    /// target enters debug mode with.
    pub fn serve_request(&self) -> Result<Pulse> {
        let request = self.next_pulse()?;
        log::debug!("target requests debug mode with {request:?}");
        self.pulse()?;
        self.next_pulse()
    }

    /// End an interactive session and give power back.
    pub fn detach(&self) -> Result<()> {
        self.send_command(CommandDescriptor::ExitActiveDebug, &[]);
        self.expect_pulse(Pulse::Bare)?;
        self.pulse()
    }

    /// The target left an energy guard: acknowledge once energy is restored.
    pub fn finish_guard(&self) -> Result<()> {
        self.expect_pulse(Pulse::Encoded(SignalCommand::Exit as u8))?;
        self.pulse()
    }
}

fn check_address(frame: &Frame, address: u32) -> Result<()> {
    match address_from_bytes(&frame.payload) {
        Some(echoed) if echoed == address => Ok(()),
        other => Err(Error::Unexpected(format!("address {other:X?}, wanted 0x{address:X}"))),
    }
}

