//! Serial port handling
//!
//! Provides low-level serial port access for scale communication.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{Connector, Transport, READ_CHUNK_SIZE};
use crate::config::SerialConfig;
use crate::error::{ConnectionError, TransportError};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
                serial_number: usb_info.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key so that ttyACM* ports come first, then ttyUSB*, then ttyS*,
/// each numerically by suffix, then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in ["ttyACM", "ttyUSB", "ttyS"].iter().enumerate() {
        if let Some(rest) = basename.strip_prefix(prefix) {
            if let Ok(num) = rest.parse::<usize>() {
                return (rank as u8, num, basename.to_string());
            }
        }
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => tracing::warn!(error = %e, "serial port enumeration failed"),
    }

    // USB adapters sometimes are not reported by the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Serial port transport
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    timeout: Duration,
    buffer: Box<[u8; READ_CHUNK_SIZE]>,
}

impl SerialTransport {
    /// Open and configure the port described by `config`
    pub fn open(config: &SerialConfig) -> Result<Self, ConnectionError> {
        let timeout = config.read_timeout();
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .timeout(timeout)
            .open()
            .map_err(|e| ConnectionError::from_serialport(&config.port, e))?;

        // Stale bytes from before the open are not part of any frame we can trust
        if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
            tracing::debug!(port = %config.port, error = %e, "failed to clear input buffer");
        }

        tracing::info!(
            port = %config.port,
            baud = config.baud_rate,
            data_bits = config.data_bits.bits(),
            parity = ?config.parity,
            stop_bits = ?config.stop_bits,
            "serial port opened"
        );

        Ok(Self {
            port: Some(port),
            name: config.port.clone(),
            timeout,
            buffer: Box::new([0u8; READ_CHUNK_SIZE]),
        })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        if timeout != self.timeout {
            port.set_timeout(timeout)
                .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
            self.timeout = timeout;
        }

        match port.read(&mut self.buffer[..]) {
            // A zero-length read on a tty means the device went away
            Ok(0) => Err(TransportError::Io(io::Error::from(io::ErrorKind::UnexpectedEof))),
            Ok(n) => Ok(self.buffer[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                Err(TransportError::Timeout)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!(port = %self.name, "serial port closed");
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&mut self, config: &SerialConfig) -> Result<Box<dyn Transport>, ConnectionError> {
        Ok(Box::new(SerialTransport::open(config)?))
    }
}
