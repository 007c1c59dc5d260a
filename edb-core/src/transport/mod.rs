//! Interrupt-driven serial transport.
//!
//! At most one transmit and one receive are in flight. Starting a second one
//! waits for the first instead of queueing. The interrupt handler moves
//! exactly one byte per call and clears a busy flag only once the matching
//! remaining count drops to zero.
//!
//! Holding the driver lock stands in for "interrupts disabled": the
//! foreground only touches state shared with the handler while holding it.

pub mod irq;

pub use irq::InterruptThread;

use crate::config::UartConfig;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Serial peripheral registers.
pub trait SerialPort: Send {
    /// Take the peripheral out of reset with the given settings.
    fn configure(&mut self, config: &UartConfig);

    /// Put the peripheral back into reset and release its pins.
    fn teardown(&mut self);

    /// Load the transmit register.
    fn write_tx(&mut self, byte: u8);

    /// Read the receive register, if a byte arrived.
    fn read_rx(&mut self) -> Option<u8>;

    /// Transmit register can take another byte.
    fn tx_ready(&self) -> bool;

    /// A received byte is waiting.
    fn rx_ready(&self) -> bool;

    /// Still shifting out the last byte.
    fn is_busy(&self) -> bool;
}

/// Byte transport used by the command loop and the console.
pub trait Transport: Send + Sync {
    /// Configure the peripheral and reset driver state.
    fn init(&self);

    /// Shut the peripheral down.
    fn teardown(&self);

    /// Send all of `data`, blocking until the last byte is out.
    fn send(&self, data: &[u8]);

    /// Fill `buf`, blocking until every byte arrived.
    fn receive(&self, buf: &mut [u8]);
}

/// Driver state shared between foreground calls and the interrupt handler.
#[derive(Debug, Default)]
pub struct TransportState {
    /// A transmit is in flight.
    pub tx_busy: bool,
    tx_buf: Vec<u8>,
    tx_pos: usize,
    /// Bytes left to transmit.
    pub tx_remaining: usize,
    /// A receive is in flight.
    pub rx_busy: bool,
    rx_buf: Vec<u8>,
    /// Bytes left to receive.
    pub rx_remaining: usize,
    tx_irq: bool,
    rx_irq: bool,
}

struct Inner<P> {
    port: P,
    state: TransportState,
}

/// Transport driver over a [`SerialPort`].
pub struct UartDriver<P: SerialPort> {
    inner: Mutex<Inner<P>>,
    tx_done: Condvar,
    rx_done: Condvar,
    config: UartConfig,
}

impl<P: SerialPort> UartDriver<P> {
    /// Wrap a peripheral. Nothing is configured until [`Transport::init`].
    pub fn new(port: P, config: UartConfig) -> Self {
        Self {
            inner: Mutex::new(Inner { port, state: TransportState::default() }),
            tx_done: Condvar::new(),
            rx_done: Condvar::new(),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_tx_idle<'a>(&self, guard: MutexGuard<'a, Inner<P>>) -> MutexGuard<'a, Inner<P>> {
        self.tx_done
            .wait_while(guard, |inner| inner.state.tx_busy)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_rx_idle<'a>(&self, guard: MutexGuard<'a, Inner<P>>) -> MutexGuard<'a, Inner<P>> {
        self.rx_done
            .wait_while(guard, |inner| inner.state.rx_busy)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start transmitting `data` without waiting for it to finish.
    ///
    /// Waits for a previous transmit first.
    pub fn async_send(&self, data: &[u8]) {
        let mut inner = self.wait_tx_idle(self.lock());
        if data.is_empty() {
            return;
        }
        let state = &mut inner.state;
        state.tx_busy = true;
        state.tx_buf.clear();
        state.tx_buf.extend_from_slice(data);
        state.tx_pos = 0;
        state.tx_remaining = data.len();
        state.tx_irq = true;
    }

    /// Transmit by polling the status register, with the handler locked out
    /// for the whole transfer.
    pub fn crit_send(&self, data: &[u8]) {
        let mut inner = self.wait_tx_idle(self.lock());
        inner.state.tx_busy = true;
        inner.state.tx_remaining = data.len();
        for &byte in data {
            inner.port.write_tx(byte);
            while !inner.port.tx_ready() {
                std::hint::spin_loop();
            }
            inner.state.tx_remaining -= 1;
        }
        inner.state.tx_busy = false;
        drop(inner);
        self.tx_done.notify_all();
    }

    /// Start receiving `len` bytes without waiting for them.
    ///
    /// Waits for a previous receive first. Collect the bytes with
    /// [`UartDriver::take_received`] once [`UartDriver::is_rx_done`].
    pub fn async_receive(&self, len: usize) {
        let mut inner = self.wait_rx_idle(self.lock());
        let state = &mut inner.state;
        state.rx_buf.clear();
        if len == 0 {
            return;
        }
        state.rx_busy = true;
        state.rx_remaining = len;
        state.rx_irq = true;
    }

    /// Receive by polling the status register, with the handler locked out
    /// for the whole transfer.
    pub fn crit_receive(&self, buf: &mut [u8]) {
        let mut inner = self.wait_rx_idle(self.lock());
        inner.state.rx_busy = true;
        inner.state.rx_remaining = buf.len();
        for slot in buf.iter_mut() {
            let byte = loop {
                if let Some(byte) = inner.port.read_rx() {
                    break byte;
                }
                std::hint::spin_loop();
            };
            *slot = byte;
            inner.state.rx_remaining -= 1;
        }
        inner.state.rx_busy = false;
        drop(inner);
        self.rx_done.notify_all();
    }

    /// Bytes collected by the last receive.
    pub fn take_received(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().state.rx_buf)
    }

    /// A transmit is in flight.
    pub fn is_tx_busy(&self) -> bool {
        self.lock().state.tx_busy
    }

    /// A receive is in flight.
    pub fn is_rx_busy(&self) -> bool {
        self.lock().state.rx_busy
    }

    /// No receive is in flight.
    pub fn is_rx_done(&self) -> bool {
        !self.is_rx_busy()
    }

    /// Interrupt handler: service at most one pending byte.
    ///
    /// Receive takes priority over transmit, as in the peripheral's
    /// interrupt vector. Returns whether anything was serviced.
    pub fn handle_interrupt(&self) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let state = &mut inner.state;

        if state.rx_irq && inner.port.rx_ready() {
            if state.rx_remaining > 0 {
                if let Some(byte) = inner.port.read_rx() {
                    state.rx_buf.push(byte);
                    state.rx_remaining -= 1;
                }
            }
            if state.rx_remaining == 0 {
                state.rx_irq = false;
                state.rx_busy = false;
                drop(guard);
                self.rx_done.notify_all();
            }
            return true;
        }

        if state.tx_irq && inner.port.tx_ready() {
            inner.port.write_tx(state.tx_buf[state.tx_pos]);
            state.tx_pos += 1;
            state.tx_remaining -= 1;
            if state.tx_remaining == 0 {
                while inner.port.is_busy() {
                    std::hint::spin_loop();
                }
                state.tx_irq = false;
                state.tx_busy = false;
                drop(guard);
                self.tx_done.notify_all();
            }
            return true;
        }

        false
    }
}

impl<P: SerialPort> Transport for UartDriver<P> {
    fn init(&self) {
        let mut inner = self.lock();
        inner.port.configure(&self.config);
        inner.state = TransportState::default();
        drop(inner);
        log::debug!("transport up at {} baud", self.config.baud_rate);
        self.tx_done.notify_all();
        self.rx_done.notify_all();
    }

    fn teardown(&self) {
        let mut inner = self.lock();
        inner.port.teardown();
        inner.state.tx_irq = false;
        inner.state.rx_irq = false;
        log::debug!("transport down");
    }

    fn send(&self, data: &[u8]) {
        self.async_send(data);
        drop(self.wait_tx_idle(self.lock()));
    }

    fn receive(&self, buf: &mut [u8]) {
        self.async_receive(buf.len());
        let mut inner = self.wait_rx_idle(self.lock());
        let received = std::mem::take(&mut inner.state.rx_buf);
        let n = received.len().min(buf.len());
        buf[..n].copy_from_slice(&received[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::serial_pair;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn driver() -> (Arc<UartDriver<crate::sim::SimSerial>>, crate::sim::HostSerial) {
        let (port, host) = serial_pair();
        let driver = Arc::new(UartDriver::new(port, UartConfig::default()));
        driver.init();
        (driver, host)
    }

    fn drain(driver: &UartDriver<crate::sim::SimSerial>) {
        while driver.handle_interrupt() {}
    }

    #[test]
    fn test_busy_clears_on_last_byte_only() {
        let (driver, host) = driver();
        driver.async_send(&[1, 2, 3]);
        assert!(driver.is_tx_busy());
        assert!(driver.handle_interrupt());
        assert!(driver.handle_interrupt());
        assert!(driver.is_tx_busy());
        assert!(driver.handle_interrupt());
        assert!(!driver.is_tx_busy());
        assert!(!driver.handle_interrupt());
        assert_eq!(host.read_exact(3, Duration::from_secs(1)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_back_to_back_rx_never_drops() {
        let (driver, host) = driver();
        host.write(&[0xA, 0xB, 0xC, 0xD]);
        driver.async_receive(3);
        assert!(driver.is_rx_busy());
        drain(&driver);
        assert!(driver.is_rx_done());
        assert_eq!(driver.take_received(), vec![0xA, 0xB, 0xC]);

        // The fourth byte stays in the peripheral for the next receive.
        driver.async_receive(1);
        drain(&driver);
        assert_eq!(driver.take_received(), vec![0xD]);
    }

    #[test]
    fn test_second_async_send_waits_for_first() {
        let (driver, host) = driver();
        driver.async_send(&[1, 2]);

        let (tx, rx) = mpsc::channel();
        let second = {
            let driver = driver.clone();
            thread::spawn(move || {
                driver.async_send(&[3, 4]);
                tx.send(()).unwrap();
            })
        };

        // Nothing services the first transfer yet, so the second must wait.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        driver.handle_interrupt();
        driver.handle_interrupt();
        rx.recv_timeout(Duration::from_secs(1)).expect("second send started");
        second.join().unwrap();
        drain(&driver);

        assert_eq!(host.read_exact(4, Duration::from_secs(1)).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_blocking_calls_with_interrupt_thread() {
        let (driver, host) = driver();
        let _irq = InterruptThread::spawn(driver.clone()).unwrap();

        driver.send(b"ping");
        assert_eq!(host.read_exact(4, Duration::from_secs(1)).unwrap(), b"ping".to_vec());

        host.write(b"pong");
        let mut buf = [0u8; 4];
        driver.receive(&mut buf);
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn test_polling_variants() {
        let (driver, host) = driver();
        driver.crit_send(&[9, 8, 7]);
        assert!(!driver.is_tx_busy());
        assert_eq!(host.read_exact(3, Duration::from_secs(1)).unwrap(), vec![9, 8, 7]);

        host.write(&[5, 6]);
        let mut buf = [0u8; 2];
        driver.crit_receive(&mut buf);
        assert_eq!(buf, [5, 6]);
        assert!(driver.is_rx_done());
    }

    #[test]
    fn test_empty_transfers_do_not_go_busy() {
        let (driver, _host) = driver();
        driver.async_send(&[]);
        assert!(!driver.is_tx_busy());
        driver.async_receive(0);
        assert!(driver.is_rx_done());
    }
}
