//! Background thread standing in for the serial interrupt vector.

use super::{SerialPort, UartDriver};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const IDLE_POLL: Duration = Duration::from_micros(50);

/// Keeps calling [`UartDriver::handle_interrupt`] until dropped.
pub struct InterruptThread {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl InterruptThread {
    /// Start servicing `driver`.
    pub fn spawn<P: SerialPort + 'static>(driver: Arc<UartDriver<P>>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("uart-irq".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    if !driver.handle_interrupt() {
                        thread::sleep(IDLE_POLL);
                    }
                }
            })
            .map_err(|source| Error::Spawn { name: "uart-irq", source })?;
        Ok(Self { stop, handle: Some(handle) })
    }
}

impl Drop for InterruptThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
