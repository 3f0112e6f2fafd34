//! Engine configuration
//!
//! Everything the engine needs is supplied through [`ScaleConfig`] at start.
//! Defaults describe the production scale: `/dev/ttyS0` at 9600 8N1, frames
//! terminated by `\r` in the `H0000.15` status-prefix layout.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::checksum::ChecksumKind;
use crate::error::ConfigError;
use crate::reading::WeightUnit;

/// Default serial device
pub const DEFAULT_PORT: &str = "/dev/ttyS0";

/// Default baud rate for scale communication
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

/// Default maximum unterminated frame length
pub const DEFAULT_MAX_FRAME_LEN: usize = 256;

/// Environment variable overriding the serial port
pub const ENV_PORT: &str = "SCALE_PORT";

/// Environment variable overriding the baud rate
pub const ENV_BAUD_RATE: &str = "SCALE_BAUD_RATE";

/// Parse a string with escape sequences into raw bytes.
/// Handles: \xNN (hex), \n, \r, \t, \\, \0, and regular characters
pub fn parse_escaped_bytes(s: &str) -> Vec<u8> {
    let mut result = Vec::new();
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'x' | b'X' => {
                    if i + 3 < bytes.len() {
                        if let Ok(hex_str) = std::str::from_utf8(&bytes[i + 2..i + 4]) {
                            if let Ok(byte_val) = u8::from_str_radix(hex_str, 16) {
                                result.push(byte_val);
                                i += 4;
                                continue;
                            }
                        }
                    }
                    // Invalid hex, keep the backslash literally
                    result.push(bytes[i]);
                    i += 1;
                }
                b'n' => {
                    result.push(b'\n');
                    i += 2;
                }
                b'r' => {
                    result.push(b'\r');
                    i += 2;
                }
                b't' => {
                    result.push(b'\t');
                    i += 2;
                }
                b'\\' => {
                    result.push(b'\\');
                    i += 2;
                }
                b'0' => {
                    result.push(0);
                    i += 2;
                }
                _ => {
                    result.push(bytes[i]);
                    i += 1;
                }
            }
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }

    result
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Serial data bits (5 to 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DataBits(u8);

impl DataBits {
    pub const EIGHT: DataBits = DataBits(8);
    pub const SEVEN: DataBits = DataBits(7);

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl Default for DataBits {
    fn default() -> Self {
        Self::EIGHT
    }
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5..=8 => Ok(Self(bits)),
            _ => Err(format!("data bits must be 5-8, got {bits}")),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(d: DataBits) -> Self {
        d.0
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(d: DataBits) -> Self {
        match d.0 {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        }
    }
}

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(format!("stop bits must be 1 or 2, got {bits}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(s: StopBits) -> Self {
        match s {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(s: StopBits) -> Self {
        match s {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Serial flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(f: FlowControl) -> Self {
        match f {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Physical link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Upper bound on a single read, in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::EIGHT,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// How frame boundaries are found in the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameMode {
    /// Frames end with this byte sequence
    Terminator(Vec<u8>),
    /// Frames have a fixed byte length, optionally starting with a sync byte
    FixedLength { length: usize, sync_byte: Option<u8> },
}

/// Frame decoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Terminator sequence, written with escapes (`"\\r\\n"`)
    pub terminator: String,
    /// Use fixed-length frames instead of a terminator
    pub fixed_length: Option<usize>,
    /// First byte of every fixed-length frame
    pub sync_byte: Option<u8>,
    /// Unterminated bytes tolerated before resynchronizing
    pub max_frame_len: usize,
    /// Strip CR/LF residue from both ends of each frame and drop blank frames
    pub trim: bool,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            terminator: "\\r".to_string(),
            fixed_length: None,
            sync_byte: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            trim: true,
        }
    }
}

impl FramingConfig {
    /// Resolve the frame boundary strategy
    pub fn mode(&self) -> FrameMode {
        match self.fixed_length {
            Some(length) => FrameMode::FixedLength {
                length,
                sync_byte: self.sync_byte,
            },
            None => FrameMode::Terminator(parse_escaped_bytes(&self.terminator)),
        }
    }
}

/// Record layouts the weight parser understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordLayout {
    /// `+0012.5kg,S`: sign, digits, unit, optional `,S`/`,U` marker
    Signed,
    /// `F0000.15`: status letter (H/L/F/D) followed by the weight
    #[default]
    StatusPrefix,
}

/// Payload format description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub layout: RecordLayout,
    pub checksum: ChecksumKind,
    /// Unit assumed when the frame carries none
    pub default_unit: WeightUnit,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            layout: RecordLayout::StatusPrefix,
            checksum: ChecksumKind::None,
            default_unit: WeightUnit::Kilogram,
        }
    }
}

/// Stability filter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Readings that must agree before an inferred settle
    pub window: usize,
    /// Maximum spread across the window, in kilograms
    pub tolerance_kg: f64,
    /// Re-publish an unchanged value after this long, in milliseconds (0 disables)
    pub heartbeat_ms: u64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window: 3,
            tolerance_kg: 0.005,
            heartbeat_ms: 2000,
        }
    }
}

impl StabilityConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

/// Connection supervisor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Consecutive errors before reporting Degraded
    pub degraded_threshold: usize,
    /// Errors further apart than this do not count as consecutive
    pub error_window_ms: u64,
    /// Consecutive transport errors before forcing a reconnect; must exceed
    /// `degraded_threshold` so the link reports Degraded first
    pub reconnect_after_errors: usize,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: 3,
            error_window_ms: 10_000,
            reconnect_after_errors: 20,
            backoff_initial_ms: 250,
            backoff_max_ms: 10_000,
        }
    }
}

impl SupervisorConfig {
    pub fn error_window(&self) -> Duration {
        Duration::from_millis(self.error_window_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub serial: SerialConfig,
    pub framing: FramingConfig,
    pub format: FormatConfig,
    pub stability: StabilityConfig,
    pub supervisor: SupervisorConfig,
    /// Log a hex + text dump of every chunk read
    pub trace_raw: bool,
    /// Bytes sent to zero the scale, written with escapes (`"T\\r\\n"`)
    pub tare_command: Option<String>,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            framing: FramingConfig::default(),
            format: FormatConfig::default(),
            stability: StabilityConfig::default(),
            supervisor: SupervisorConfig::default(),
            trace_raw: false,
            tare_command: None,
        }
    }
}

impl ScaleConfig {
    /// Default configuration for `port`
    pub fn for_port(port: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.serial.port = port.into();
        config
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SCALE_PORT` / `SCALE_BAUD_RATE` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(
            std::env::var(ENV_PORT).ok(),
            std::env::var(ENV_BAUD_RATE).ok(),
        )
    }

    /// Apply port and baud overrides given as strings
    pub fn apply_overrides(
        &mut self,
        port: Option<String>,
        baud_rate: Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(port) = port.filter(|p| !p.trim().is_empty()) {
            self.serial.port = port.trim().to_string();
        }
        if let Some(baud) = baud_rate {
            self.serial.baud_rate = baud.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "serial.baud_rate",
                reason: format!("not a number: {baud:?}"),
            })?;
        }
        Ok(())
    }

    /// Raw tare command bytes
    pub fn tare_bytes(&self) -> Option<Vec<u8>> {
        self.tare_command
            .as_deref()
            .map(parse_escaped_bytes)
            .filter(|b| !b.is_empty())
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if self.serial.port.trim().is_empty() {
            return Err(invalid("serial.port", "must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(invalid("serial.baud_rate", "must be greater than zero"));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(invalid("serial.read_timeout_ms", "must be greater than zero"));
        }
        match self.framing.mode() {
            FrameMode::Terminator(terminator) => {
                if terminator.is_empty() {
                    return Err(invalid("framing.terminator", "must not be empty"));
                }
            }
            FrameMode::FixedLength { length, .. } => {
                if length == 0 {
                    return Err(invalid("framing.fixed_length", "must be greater than zero"));
                }
            }
        }
        if self.framing.max_frame_len == 0 {
            return Err(invalid("framing.max_frame_len", "must be greater than zero"));
        }
        if self.stability.window == 0 {
            return Err(invalid("stability.window", "must be at least 1"));
        }
        if !self.stability.tolerance_kg.is_finite() || self.stability.tolerance_kg < 0.0 {
            return Err(invalid("stability.tolerance_kg", "must be a non-negative number"));
        }
        if self.supervisor.degraded_threshold == 0 {
            return Err(invalid("supervisor.degraded_threshold", "must be at least 1"));
        }
        if self.supervisor.reconnect_after_errors <= self.supervisor.degraded_threshold {
            return Err(invalid(
                "supervisor.reconnect_after_errors",
                "must be greater than degraded_threshold",
            ));
        }
        if self.supervisor.backoff_max_ms < self.supervisor.backoff_initial_ms {
            return Err(invalid(
                "supervisor.backoff_max_ms",
                "must not be smaller than backoff_initial_ms",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_escaped_bytes() {
        assert_eq!(parse_escaped_bytes(r"\r"), vec![b'\r']);
        assert_eq!(parse_escaped_bytes(r"\r\n"), vec![b'\r', b'\n']);
        assert_eq!(parse_escaped_bytes(r"\x02"), vec![0x02]);
        assert_eq!(parse_escaped_bytes(r"T\r\n"), b"T\r\n".to_vec());
        assert_eq!(parse_escaped_bytes(r"\\"), vec![b'\\']);
        assert_eq!(parse_escaped_bytes(r"\0"), vec![0]);
        // Invalid hex escape is kept literally
        assert_eq!(parse_escaped_bytes(r"\xZZ"), b"\\xZZ".to_vec());
    }

    #[test]
    fn test_defaults_match_production_scale() {
        let config = ScaleConfig::default();
        assert_eq!(config.serial.port, "/dev/ttyS0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.data_bits.bits(), 8);
        assert_eq!(config.serial.parity, Parity::None);
        assert_eq!(config.serial.stop_bits, StopBits::One);
        assert_eq!(config.framing.mode(), FrameMode::Terminator(vec![b'\r']));
        assert_eq!(config.format.layout, RecordLayout::StatusPrefix);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut config = ScaleConfig::default();
        config
            .apply_overrides(Some("COM3".to_string()), Some("4800".to_string()))
            .unwrap();
        assert_eq!(config.serial.port, "COM3");
        assert_eq!(config.serial.baud_rate, 4800);

        let err = config.apply_overrides(None, Some("fast".to_string()));
        assert!(matches!(err, Err(ConfigError::Invalid { field: "serial.baud_rate", .. })));

        // Blank port leaves the current value
        config.apply_overrides(Some("  ".to_string()), None).unwrap();
        assert_eq!(config.serial.port, "COM3");
    }

    #[test]
    fn test_data_bits_range() {
        assert!(DataBits::try_from(7).is_ok());
        assert!(DataBits::try_from(9).is_err());
        assert!(serde_json::from_str::<DataBits>("4").is_err());
    }

    #[test]
    fn test_tare_bytes() {
        let mut config = ScaleConfig::default();
        assert_eq!(config.tare_bytes(), None);
        config.tare_command = Some(r"T\r\n".to_string());
        assert_eq!(config.tare_bytes(), Some(b"T\r\n".to_vec()));
        config.tare_command = Some(String::new());
        assert_eq!(config.tare_bytes(), None);
    }
}
