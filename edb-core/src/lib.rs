//! EDB Core - the on-target side of the energy-interference-free debugger.
//!
//! This crate runs inside the firmware of an intermittently powered device.
//! It lets an external debugger stop the application, inspect and modify
//! memory, manage breakpoints and relay console output, while the debugger
//! takes care of the device's power across every mode change.

pub mod breakpoint;
pub mod config;
pub mod console;
pub mod error;
pub mod hal;
pub mod monitor;
pub mod protocol;
pub mod signal;
pub mod sim;
pub mod transport;

// Re-export commonly used types
pub use config::{CodepointMode, MonitorConfig, TimingConfig, UartConfig};
pub use console::Console;
pub use error::{Error, Result};
pub use monitor::{DebugState, Monitor, Peripherals};
pub use protocol::{CommandDescriptor, Features, Frame, InterruptType, ResponseDescriptor};
pub use transport::{SerialPort, Transport, UartDriver};
