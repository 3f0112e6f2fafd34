//! Error types
//!
//! One enum per concern. Only [`ConnectionError`] from the initial open is ever
//! surfaced as a hard failure; the rest are handled inside the acquisition loop.

use std::io;

use thiserror::Error;

/// Errors that can occur while opening a serial link
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Permission denied opening {0}")]
    PermissionDenied(String),

    #[error("Invalid serial configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Scale engine already running")]
    AlreadyRunning,
}

impl ConnectionError {
    /// Classify a `serialport` open failure for `port`
    pub fn from_serialport(port: &str, err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::PortNotFound(port.to_string()),
            serialport::ErrorKind::InvalidInput => Self::InvalidConfig(err.to_string()),
            serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
                Self::PortNotFound(port.to_string())
            }
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                Self::PermissionDenied(port.to_string())
            }
            _ => Self::OpenFailed {
                port: port.to_string(),
                reason: err.to_string(),
            },
        }
    }
}

/// Errors returned by a transport read or write
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Read timed out")]
    Timeout,

    #[error("Transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether this error means the device is gone and the port must be reopened
    pub fn is_link_lost(&self) -> bool {
        match self {
            Self::Timeout => false,
            Self::Closed => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::NotFound
                    | io::ErrorKind::PermissionDenied
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
        }
    }
}

/// Non-fatal frame boundary problems reported by the decoder
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Unterminated input exceeded {limit} bytes, resynchronizing")]
    Overflow { limit: usize },

    #[error("Discarded {discarded} bytes before frame sync")]
    Garbage { discarded: usize },
}

/// Why a frame could not be turned into a reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Checksum mismatch: frame carries {expected:#x}, computed {actual:#x}")]
    ChecksumFailed { expected: u32, actual: u32 },

    #[error("Unknown unit code: {0:?}")]
    UnknownUnit(String),
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors from engine control operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("Scale engine is not running")]
    NotRunning,

    #[error("No tare command configured")]
    TareUnsupported,
}

/// No stable weight has been produced yet
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("No stable weight available")]
pub struct NotAvailable;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_lost_classification() {
        assert!(!TransportError::Timeout.is_link_lost());
        assert!(TransportError::Closed.is_link_lost());
        assert!(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_link_lost());
        assert!(!TransportError::Io(io::Error::from(io::ErrorKind::Other)).is_link_lost());
    }

    #[test]
    fn test_checksum_error_display() {
        let err = ParseError::ChecksumFailed {
            expected: 0x1f,
            actual: 0x2e,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: frame carries 0x1f, computed 0x2e"
        );
    }
}
