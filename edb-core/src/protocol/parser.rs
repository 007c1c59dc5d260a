//! Incremental command parser.
//!
//! Fed one chunk at a time (down to single bytes), the parser keeps its
//! position across calls. A wrong identifier byte is dropped and the parser
//! stays put, which resynchronizes on the next message.

use super::{COMMAND_CAPACITY, IDENTIFIER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Identifier,
    Descriptor,
    DataLen,
    Padding,
    Data,
}

/// A fully received command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Raw descriptor byte.
    pub descriptor: u8,
    len: u8,
    data: [u8; COMMAND_CAPACITY],
}

impl Command {
    /// Data bytes that fit the command buffer.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(COMMAND_CAPACITY)]
    }

    /// Declared data length; bytes past [`COMMAND_CAPACITY`] were dropped.
    pub const fn len(&self) -> u8 {
        self.len
    }

    /// Whether the command carried no data.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Five-state message parser.
#[derive(Debug, Clone)]
pub struct CommandParser {
    state: ParseState,
    remaining: u8,
    current: Command,
}

impl CommandParser {
    /// A parser waiting for an identifier byte.
    pub const fn new() -> Self {
        Self {
            state: ParseState::Identifier,
            remaining: 0,
            current: Command { descriptor: 0, len: 0, data: [0; COMMAND_CAPACITY] },
        }
    }

    /// Consume one byte; returns the command it completes, if any.
    pub fn push(&mut self, byte: u8) -> Option<Command> {
        match self.state {
            ParseState::Identifier => {
                if byte == IDENTIFIER {
                    self.state = ParseState::Descriptor;
                } else {
                    log::trace!("dropping stray byte 0x{byte:02X}");
                }
                None
            }
            ParseState::Descriptor => {
                self.current.descriptor = byte;
                self.current.len = 0;
                self.remaining = 0;
                self.state = ParseState::DataLen;
                None
            }
            ParseState::DataLen => {
                self.remaining = byte;
                self.state = ParseState::Padding;
                None
            }
            ParseState::Padding => {
                if self.remaining == 0 {
                    self.state = ParseState::Identifier;
                    Some(self.current)
                } else {
                    self.state = ParseState::Data;
                    None
                }
            }
            ParseState::Data => {
                if let Some(slot) = self.current.data.get_mut(usize::from(self.current.len)) {
                    *slot = byte;
                }
                self.current.len += 1;
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.state = ParseState::Identifier;
                    Some(self.current)
                } else {
                    None
                }
            }
        }
    }

    /// Consume a chunk; returns every command completed inside it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Command> {
        chunk.iter().filter_map(|&byte| self.push(byte)).collect()
    }

    /// Whether the parser is between messages.
    pub fn is_idle(&self) -> bool {
        self.state == ParseState::Identifier
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}
