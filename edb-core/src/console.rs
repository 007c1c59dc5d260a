//! Console output and application data relay.
//!
//! Text is collected into one `Stdio` payload and sent when a newline
//! arrives or the payload is full. Application data goes out as separate
//! `AppOutput` messages.

use crate::monitor::Monitor;
use crate::protocol::{ReplyBuffer, ResponseDescriptor, IO_PAYLOAD_SIZE};
use crate::transport::Transport;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

struct Pending {
    payload: Vec<u8>,
    msg: ReplyBuffer,
}

impl Pending {
    fn flush(&mut self, transport: &dyn Transport, descriptor: ResponseDescriptor) {
        self.msg.start(descriptor).extend(&self.payload);
        transport.send(self.msg.finish());
        self.payload.clear();
    }
}

/// Buffered console over the transport.
pub struct Console {
    transport: Arc<dyn Transport>,
    pending: Mutex<Pending>,
}

impl Console {
    /// Console writing to `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Mutex::new(Pending {
                payload: Vec::with_capacity(IO_PAYLOAD_SIZE),
                msg: ReplyBuffer::new(),
            }),
        }
    }

    /// Append one byte; flushes on newline or a full payload.
    pub fn putchar(&self, c: u8) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.payload.push(c);
        if pending.payload.len() == IO_PAYLOAD_SIZE || c == b'\n' {
            pending.flush(self.transport.as_ref(), ResponseDescriptor::Stdio);
        }
    }

    /// Print a line.
    pub fn puts(&self, s: &str) {
        self.puts_base(s.as_bytes(), true);
    }

    /// Print without a trailing newline. Still flushes.
    pub fn puts_no_newline(&self, s: &str) {
        self.puts_base(s.as_bytes(), false);
    }

    fn puts_base(&self, mut bytes: &[u8], newline: bool) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // At least one message goes out, even for an empty string.
        loop {
            let room = (IO_PAYLOAD_SIZE - 1).saturating_sub(pending.payload.len());
            let (chunk, rest) = bytes.split_at(room.min(bytes.len()));
            pending.payload.extend_from_slice(chunk);
            bytes = rest;
            if bytes.is_empty() && newline {
                pending.payload.push(b'\n');
            }
            pending.flush(self.transport.as_ref(), ResponseDescriptor::Stdio);
            if bytes.is_empty() {
                break;
            }
        }
    }

    /// Formatted print through [`Console::putchar`].
    pub fn print(&self, args: fmt::Arguments<'_>) {
        // Writing to the console cannot fail.
        let _ = fmt::Write::write_fmt(&mut ConsoleWriter(self), args);
    }

    /// Send `data` as one `AppOutput` message, truncated to what fits.
    pub fn output_app_data(&self, data: &[u8]) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let len = data.len().min(IO_PAYLOAD_SIZE - 1);
        let Pending { msg, .. } = &mut *pending;
        msg.start(ResponseDescriptor::AppOutput).extend(&data[..len]);
        self.transport.send(msg.finish());
    }
}

/// [`fmt::Write`] adapter for [`Console`].
pub struct ConsoleWriter<'a>(pub &'a Console);

impl fmt::Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            self.0.putchar(byte);
        }
        Ok(())
    }
}

impl Monitor {
    /// Print without disturbing the energy state: the debugger powers the
    /// target while the text goes out.
    pub fn eif_print(&self, args: fmt::Arguments<'_>) {
        self.request_non_interactive_debug_mode();
        self.console().print(args);
        self.resume_application();
    }

    /// Bring the transport up for printing outside debug mode.
    pub fn enable_bare_print(&self) {
        self.transport().init();
    }

    /// Shut the transport down again.
    pub fn disable_bare_print(&self) {
        self.transport().teardown();
    }

    /// Relay application data to the debugger.
    pub fn output_app_data(&self, data: &[u8]) {
        self.console().output_app_data(data);
    }
}
