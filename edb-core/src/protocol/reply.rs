//! Fixed-capacity reply builder.

use super::{ResponseDescriptor, HEADER_SIZE, IDENTIFIER, REPLY_CAPACITY};

/// One outgoing message, built in place and flushed in one transport call.
///
/// Bytes pushed past [`REPLY_CAPACITY`] are dropped; callers clip lengths
/// against [`ReplyBuffer::remaining`] first.
#[derive(Debug, Clone)]
pub struct ReplyBuffer {
    buf: [u8; REPLY_CAPACITY],
    len: usize,
}

impl ReplyBuffer {
    /// An empty buffer.
    pub const fn new() -> Self {
        Self { buf: [0; REPLY_CAPACITY], len: 0 }
    }

    /// Discard the previous message and write a fresh header.
    pub fn start(&mut self, descriptor: ResponseDescriptor) -> &mut Self {
        self.buf[..HEADER_SIZE].copy_from_slice(&[IDENTIFIER, descriptor as u8, 0, 0]);
        self.len = HEADER_SIZE;
        self
    }

    /// Append one byte.
    pub fn push(&mut self, byte: u8) -> &mut Self {
        if let Some(slot) = self.buf.get_mut(self.len) {
            *slot = byte;
            self.len += 1;
        }
        self
    }

    /// Append bytes, up to the remaining capacity.
    pub fn extend(&mut self, bytes: &[u8]) -> &mut Self {
        let n = bytes.len().min(self.remaining());
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        self
    }

    /// Room left for data.
    pub const fn remaining(&self) -> usize {
        REPLY_CAPACITY - self.len
    }

    /// Writable tail of the buffer, for producers that fill it directly.
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Mark `n` bytes of [`ReplyBuffer::spare`] as written.
    pub fn commit(&mut self, n: usize) {
        self.len += n.min(self.remaining());
    }

    /// Patch the length field and return the message.
    pub fn finish(&mut self) -> &[u8] {
        self.buf[2] = (self.len - HEADER_SIZE) as u8;
        &self.buf[..self.len]
    }
}

impl Default for ReplyBuffer {
    fn default() -> Self {
        Self::new()
    }
}
