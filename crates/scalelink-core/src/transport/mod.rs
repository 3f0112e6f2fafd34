//! Byte transports
//!
//! A [`Transport`] moves raw bytes and knows nothing about frames. A
//! [`Connector`] opens transports so the supervisor can reopen the link after
//! the device goes away.

pub mod mock;
pub mod serial;

use std::time::Duration;

use crate::config::SerialConfig;
use crate::error::{ConnectionError, TransportError};

pub use mock::{MockConnector, MockEvent, MockHandle, MockTransport};
pub use serial::{list_ports, PortInfo, SerialConnector, SerialTransport};

/// Size of a single read from the device
pub const READ_CHUNK_SIZE: usize = 1024;

/// Bidirectional byte stream to a scale
pub trait Transport: Send {
    /// Wait up to `timeout` for bytes.
    ///
    /// Returns every byte received (never an empty vector); `Timeout` if
    /// nothing arrived in the window.
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write all of `bytes` to the device
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Release the underlying handle. Further reads return `Closed`.
    fn close(&mut self);

    /// Human readable link name for logs
    fn describe(&self) -> String;
}

/// Opens transports from a serial configuration
pub trait Connector: Send {
    fn open(&mut self, config: &SerialConfig) -> Result<Box<dyn Transport>, ConnectionError>;
}
