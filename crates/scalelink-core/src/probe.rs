//! Port probing
//!
//! Opens a port with a candidate configuration and waits for the first frame
//! that parses as a weight. Used to find which port (and baud rate) a scale is
//! attached to before starting the engine.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ScaleConfig;
use crate::error::TransportError;
use crate::frame::FrameDecoder;
use crate::parser::WeightParser;
use crate::reading::WeightReading;
use crate::trace;
use crate::transport::{Connector, SerialConnector};

/// Default time to wait for a parseable frame
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of probing one port
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub success: bool,
    pub port: String,
    pub baud_rate: u32,
    /// First reading decoded from the port
    pub reading: Option<WeightReading>,
    /// The frame that produced `reading`, as text
    pub raw: Option<String>,
    pub error: Option<String>,
    /// Frames received that did not parse
    pub rejected_frames: usize,
}

impl ProbeResult {
    fn failed(config: &ScaleConfig, error: impl Into<String>, rejected_frames: usize) -> Self {
        Self {
            success: false,
            port: config.serial.port.clone(),
            baud_rate: config.serial.baud_rate,
            reading: None,
            raw: None,
            error: Some(error.into()),
            rejected_frames,
        }
    }

    /// One-line human summary
    pub fn message(&self) -> String {
        match (&self.reading, &self.error) {
            (Some(reading), _) => format!(
                "Scale detected on {} @ {} baud: {}",
                self.port, self.baud_rate, reading
            ),
            (None, Some(error)) => format!("No scale on {}: {}", self.port, error),
            (None, None) => format!("No scale on {}", self.port),
        }
    }
}

/// Probe a real serial port
pub fn probe_port(config: &ScaleConfig, timeout: Duration) -> ProbeResult {
    probe_with(&mut SerialConnector, config, timeout)
}

/// Probe through any connector
pub fn probe_with(
    connector: &mut dyn Connector,
    config: &ScaleConfig,
    timeout: Duration,
) -> ProbeResult {
    tracing::info!(
        port = %config.serial.port,
        baud = config.serial.baud_rate,
        "probing port"
    );

    let mut transport = match connector.open(&config.serial) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::warn!(port = %config.serial.port, error = %e, "probe open failed");
            return ProbeResult::failed(config, e.to_string(), 0);
        }
    };

    let mut decoder = FrameDecoder::from_config(&config.framing);
    let parser = WeightParser::from_config(&config.format);
    let deadline = Instant::now() + timeout;
    let mut rejected = 0;

    let result = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break ProbeResult::failed(config, "no response from scale (timeout)", rejected);
        }

        let chunk = match transport.read(remaining.min(config.serial.read_timeout())) {
            Ok(chunk) => chunk,
            Err(TransportError::Timeout) => continue,
            Err(e) => break ProbeResult::failed(config, e.to_string(), rejected),
        };
        if config.trace_raw {
            trace::log_chunk(&config.serial.port, &chunk);
        }

        let mut found = None;
        for frame in decoder.feed(&chunk).filter_map(Result::ok) {
            let raw = frame.as_text();
            match parser.parse(frame) {
                Ok(reading) => {
                    found = Some((reading, raw));
                    break;
                }
                Err(e) => {
                    tracing::debug!(frame = %raw, error = %e, "probe frame rejected");
                    rejected += 1;
                }
            }
        }

        if let Some((reading, raw)) = found {
            break ProbeResult {
                success: true,
                port: config.serial.port.clone(),
                baud_rate: config.serial.baud_rate,
                reading: Some(reading),
                raw: Some(raw),
                error: None,
                rejected_frames: rejected,
            };
        }
    };

    transport.close();
    tracing::info!(port = %result.port, success = result.success, "probe finished");
    result
}
