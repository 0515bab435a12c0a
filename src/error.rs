//! Error types for Perf Observer

use crate::counter::status;
use std::io;
use thiserror::Error;

/// Result type alias for observer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Perf Observer
#[derive(Error, Debug)]
pub enum Error {
    /// Unrecoverable OS-level failure (session open/close, counter binding,
    /// collection, memory statistics, process snapshot)
    #[error("System fault (0x{code:08X}): {message}")]
    SystemFault {
        /// Platform error or PDH status code
        code: u32,
        /// Human-readable description of `code`
        message: String,
    },

    /// The requested process does not exist
    #[error("Process with id {0} not found")]
    ProcessNotFound(u32),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unsupported platform
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

impl Error {
    /// Build a [`Error::SystemFault`] from a raw platform/PDH code
    pub fn system(code: u32) -> Self {
        Error::SystemFault {
            code,
            message: status::describe(code),
        }
    }

    /// A failed OS read as a [`Error::SystemFault`] carrying its errno
    pub fn os(err: io::Error) -> Self {
        Error::SystemFault {
            code: err.raw_os_error().unwrap_or(0) as u32,
            message: err.to_string(),
        }
    }

    /// Platform code carried by a system fault
    pub fn code(&self) -> Option<u32> {
        match self {
            Error::SystemFault { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when a counter read failed because the entity it names is gone
    ///
    /// The poll that hit it fails, but the observer stays usable.
    pub fn is_stale_counter(&self) -> bool {
        matches!(self.code(), Some(code) if status::is_stale(code))
    }
}
