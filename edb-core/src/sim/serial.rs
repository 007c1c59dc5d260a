//! Serial wire between the simulated target and the host.

use crate::config::UartConfig;
use crate::transport::SerialPort;
use crate::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::cell::Cell;
use std::time::Duration;

/// Target end: a serial peripheral whose shift register is infinitely fast.
pub struct SimSerial {
    tx: Sender<u8>,
    rx: Receiver<u8>,
    latched: Cell<Option<u8>>,
    enabled: bool,
}

/// Host end of the wire.
pub struct HostSerial {
    tx: Sender<u8>,
    rx: Receiver<u8>,
}

/// Connected target and host ends.
pub fn serial_pair() -> (SimSerial, HostSerial) {
    let (to_host, from_target) = unbounded();
    let (to_target, from_host) = unbounded();
    (
        SimSerial { tx: to_host, rx: from_host, latched: Cell::new(None), enabled: false },
        HostSerial { tx: to_target, rx: from_target },
    )
}

impl SimSerial {
    fn latch(&self) -> Option<u8> {
        if self.latched.get().is_none() {
            match self.rx.try_recv() {
                Ok(byte) => self.latched.set(Some(byte)),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
            }
        }
        self.latched.get()
    }
}

impl SerialPort for SimSerial {
    fn configure(&mut self, config: &UartConfig) {
        let (divisor, fraction) = config.prescaler();
        log::trace!("sim uart: prescaler {divisor} + {fraction}/16");
        self.enabled = true;
    }

    fn teardown(&mut self) {
        self.enabled = false;
    }

    fn write_tx(&mut self, byte: u8) {
        if self.enabled {
            // The host may be gone; a real line would not notice either.
            let _ = self.tx.send(byte);
        } else {
            log::trace!("sim uart: dropped 0x{byte:02X}, peripheral off");
        }
    }

    fn read_rx(&mut self) -> Option<u8> {
        if !self.enabled {
            return None;
        }
        self.latch();
        self.latched.take()
    }

    fn tx_ready(&self) -> bool {
        true
    }

    fn rx_ready(&self) -> bool {
        self.enabled && self.latch().is_some()
    }

    fn is_busy(&self) -> bool {
        false
    }
}

impl HostSerial {
    /// Send bytes to the target.
    pub fn write(&self, bytes: &[u8]) {
        for &byte in bytes {
            let _ = self.tx.send(byte);
        }
    }

    /// Next byte from the target.
    pub fn read_byte(&self, timeout: Duration) -> Result<u8> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => Error::Timeout { what: "serial byte", timeout },
            RecvTimeoutError::Disconnected => Error::Disconnected,
        })
    }

    /// Next `n` bytes from the target.
    pub fn read_exact(&self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        (0..n).map(|_| self.read_byte(timeout)).collect()
    }

    /// A byte, if one is already waiting.
    pub fn try_read_byte(&self) -> Option<u8> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_port_drops_tx_and_holds_rx() {
        let (mut port, host) = serial_pair();
        port.write_tx(1);
        assert!(host.try_read_byte().is_none());

        host.write(&[9]);
        assert!(!port.rx_ready());
        port.configure(&UartConfig::default());
        assert!(port.rx_ready());
        assert_eq!(port.read_rx(), Some(9));
        assert_eq!(port.read_rx(), None);
    }

    #[test]
    fn test_read_timeout() {
        let (_port, host) = serial_pair();
        let err = host.read_byte(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
