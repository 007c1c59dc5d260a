//! Wire protocol shared by target and debugger.
//!
//! Every message, in both directions, is a 4-byte header followed by
//! `length` data bytes:
//!
//! | Byte | Name       | Description                          |
//! | ---- | ---------- | ------------------------------------ |
//! | 0    | identifier | Always [`IDENTIFIER`]                |
//! | 1    | descriptor | [`CommandDescriptor`] or [`ResponseDescriptor`] |
//! | 2    | length     | Number of data bytes                 |
//! | 3    | padding    | Zero, keeps data aligned             |
//! | 4..  | data       | `length` bytes                       |

pub mod parser;
pub mod reply;

pub use parser::{Command, CommandParser};
pub use reply::ReplyBuffer;

use bitflags::bitflags;

/// Magic first byte of every message.
pub const IDENTIFIER: u8 = 0xF1;

/// Size of the message header.
pub const HEADER_SIZE: usize = 4;

/// Capacity of the reply buffer, header included.
pub const REPLY_CAPACITY: usize = 64;

/// Maximum number of command data bytes kept by the parser.
pub const COMMAND_CAPACITY: usize = 16;

/// Maximum console payload per message.
pub const IO_PAYLOAD_SIZE: usize = 48;

/// Size of an encoded address field.
pub const ADDRESS_SIZE: usize = 4;

/// Largest memory read that fits one reply.
pub const MAX_READ_LEN: usize = REPLY_CAPACITY - HEADER_SIZE - ADDRESS_SIZE;

/// Number of payload bits carried by an encoded signal pulse.
pub const SIG_SERIAL_NUM_BITS: usize = 3;

/// Commands sent by the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandDescriptor {
    /// Report the program counter saved when debug mode was entered.
    GetPc = 0x00,
    /// Reserved.
    ExamineMemory = 0x01,
    /// Leave the active debug mode.
    ExitActiveDebug = 0x02,
    /// `{addr:4, len:1}`
    ReadMem = 0x03,
    /// `{addr:4, len:1, data:len}`
    WriteMem = 0x04,
    /// `{index:1, enable:1}`
    Breakpoint = 0x05,
    /// Report why execution was interrupted.
    GetInterruptContext = 0x06,
    /// `{value:1}`, echoed as an encoded pulse on the signal line.
    SerialEcho = 0x07,
    /// Pull buffered application output.
    GetAppOutput = 0x08,
}

impl TryFrom<u8> for CommandDescriptor {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Self::GetPc,
            0x01 => Self::ExamineMemory,
            0x02 => Self::ExitActiveDebug,
            0x03 => Self::ReadMem,
            0x04 => Self::WriteMem,
            0x05 => Self::Breakpoint,
            0x06 => Self::GetInterruptContext,
            0x07 => Self::SerialEcho,
            0x08 => Self::GetAppOutput,
            other => return Err(other),
        })
    }
}

/// Messages sent by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseDescriptor {
    /// `{addr:4}`
    Address = 0x00,
    /// `{addr:4, data...}`
    Memory = 0x01,
    /// Breakpoint command acknowledged.
    BreakpointAck = 0x02,
    /// `{type:1, id:2}`
    InterruptContext = 0x03,
    /// Echo pulse sent.
    SerialEchoAck = 0x04,
    /// Console text.
    Stdio = 0x05,
    /// Application data relayed to the host.
    AppOutput = 0x06,
    /// Unsolicited: the target saw the debug-on-boot request.
    Interrupted = 0x07,
}

impl TryFrom<u8> for ResponseDescriptor {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Self::Address,
            0x01 => Self::Memory,
            0x02 => Self::BreakpointAck,
            0x03 => Self::InterruptContext,
            0x04 => Self::SerialEchoAck,
            0x05 => Self::Stdio,
            0x06 => Self::AppOutput,
            0x07 => Self::Interrupted,
            other => return Err(other),
        })
    }
}

/// Why execution was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum InterruptType {
    /// Not interrupted.
    #[default]
    None = 0,
    /// The debugger raised the signal line.
    DebuggerRequest = 1,
    /// Generic target request.
    TargetRequest = 2,
    /// An enabled breakpoint was hit.
    Breakpoint = 3,
    /// Energy-conditioned breakpoint.
    EnergyBreakpoint = 4,
    /// Entering an energy guard; execution continues right away.
    EnergyGuard = 5,
    /// A failed assertion.
    Assert = 6,
    /// Interrupted on boot.
    Boot = 7,
}

impl InterruptType {
    /// Decode a wire value.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::DebuggerRequest,
            2 => Self::TargetRequest,
            3 => Self::Breakpoint,
            4 => Self::EnergyBreakpoint,
            5 => Self::EnergyGuard,
            6 => Self::Assert,
            7 => Self::Boot,
            _ => return None,
        })
    }
}

bitflags! {
    /// What the monitor provides while in debug mode. Must fit in
    /// [`SIG_SERIAL_NUM_BITS`] since it is sent as a pulse payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Features: u8 {
        /// Run the command loop.
        const INTERACTIVE = 0x01;
        /// Bring up the serial transport.
        const WITH_TRANSPORT = 0x02;
        /// Bring up the secondary bus.
        const WITH_SECONDARY_BUS = 0x04;
    }
}

impl Features {
    /// Interactive session over the serial transport.
    pub const FULL: Self = Self::INTERACTIVE.union(Self::WITH_TRANSPORT);
}

/// Payloads the target sends over the signal line while the debugger
/// already considers it in debug mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignalCommand {
    /// Nothing.
    None = 0,
    /// Nested request (assert/breakpoint inside an energy guard).
    Interrupt = 1,
    /// Leaving the energy guard.
    Exit = 2,
}

/// Why and how debug mode was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptContext {
    /// Cause.
    pub kind: InterruptType,
    /// Breakpoint index, assertion line, ...
    pub id: u16,
    /// Requested features.
    pub features: Features,
}

impl InterruptContext {
    /// Reset to "not interrupted".
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Encode a 32-bit address the way every message carries it.
pub const fn address_bytes(address: u32) -> [u8; ADDRESS_SIZE] {
    address.to_le_bytes()
}

/// Decode the leading address field of a payload.
pub fn address_from_bytes(data: &[u8]) -> Option<u32> {
    let bytes: [u8; ADDRESS_SIZE] = data.get(..ADDRESS_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// A complete message as seen by the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw descriptor byte.
    pub descriptor: u8,
    /// Data bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame from a raw descriptor.
    pub fn new(descriptor: u8, payload: &[u8]) -> Self {
        Self { descriptor, payload: payload.to_vec() }
    }

    /// Build a debugger command.
    pub fn command(descriptor: CommandDescriptor, payload: &[u8]) -> Self {
        Self::new(descriptor as u8, payload)
    }

    /// Serialize with header. Payloads longer than 255 bytes are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len().min(usize::from(u8::MAX));
        let mut bytes = Vec::with_capacity(HEADER_SIZE + len);
        bytes.extend_from_slice(&[IDENTIFIER, self.descriptor, len as u8, 0]);
        bytes.extend_from_slice(&self.payload[..len]);
        bytes
    }

    /// The descriptor as a target response, if it is one.
    pub fn response(&self) -> Option<ResponseDescriptor> {
        ResponseDescriptor::try_from(self.descriptor).ok()
    }
}

/// `ReadMem` payload.
pub fn read_mem_payload(address: u32, len: u8) -> Vec<u8> {
    let mut payload = address_bytes(address).to_vec();
    payload.push(len);
    payload
}

/// `WriteMem` payload.
pub fn write_mem_payload(address: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = address_bytes(address).to_vec();
    payload.push(data.len() as u8);
    payload.extend_from_slice(data);
    payload
}
