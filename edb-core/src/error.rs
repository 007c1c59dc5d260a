//! Error types.
//!
//! Only setup paths and the host-side helpers fail loudly. The target-side
//! protocol never surfaces errors: malformed input is dropped silently.

use std::time::Duration;

/// Errors returned by fallible `edb-core` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A configuration or persistence file could not be accessed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration or persistence file is not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The host side waited too long for the target.
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: &'static str,
        /// How long the wait lasted.
        timeout: Duration,
    },

    /// The other end of a simulated wire went away.
    #[error("link closed")]
    Disconnected,

    /// A reply did not start with the target identifier byte.
    #[error("unexpected identifier byte 0x{0:02X}")]
    BadIdentifier(u8),

    /// The target answered with something the host did not expect.
    #[error("unexpected {0}")]
    Unexpected(String),

    /// An interrupt thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
