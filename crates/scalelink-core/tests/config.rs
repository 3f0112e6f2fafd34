use std::io::Write;

use pretty_assertions::assert_eq;
use scalelink_core::checksum::ChecksumKind;
use scalelink_core::config::{FrameMode, Parity, RecordLayout, StopBits};
use scalelink_core::{ConfigError, ScaleConfig, WeightUnit};
use tempfile::NamedTempFile;

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config_file() {
    let file = write_config(
        r#"{
            "serial": {
                "port": "/dev/ttyUSB0",
                "baud_rate": 4800,
                "data_bits": 7,
                "parity": "even",
                "stop_bits": 2,
                "read_timeout_ms": 250
            },
            "framing": { "terminator": "\\r\\n", "max_frame_len": 64 },
            "format": { "layout": "signed", "checksum": "crc32", "default_unit": "gram" },
            "stability": { "window": 5, "tolerance_kg": 0.002, "heartbeat_ms": 1000 },
            "supervisor": { "degraded_threshold": 4, "backoff_initial_ms": 100 },
            "trace_raw": true,
            "tare_command": "T\\r\\n"
        }"#,
    );

    let config = ScaleConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.serial.port, "/dev/ttyUSB0");
    assert_eq!(config.serial.baud_rate, 4800);
    assert_eq!(config.serial.data_bits.bits(), 7);
    assert_eq!(config.serial.parity, Parity::Even);
    assert_eq!(config.serial.stop_bits, StopBits::Two);
    assert_eq!(config.framing.mode(), FrameMode::Terminator(b"\r\n".to_vec()));
    assert_eq!(config.framing.max_frame_len, 64);
    assert_eq!(config.format.layout, RecordLayout::Signed);
    assert_eq!(config.format.checksum, ChecksumKind::Crc32);
    assert_eq!(config.format.default_unit, WeightUnit::Gram);
    assert_eq!(config.stability.window, 5);
    assert_eq!(config.supervisor.degraded_threshold, 4);
    // Unspecified fields keep their defaults
    assert_eq!(config.supervisor.backoff_max_ms, 10_000);
    assert!(config.trace_raw);
    assert_eq!(config.tare_bytes(), Some(b"T\r\n".to_vec()));
}

#[test]
fn test_fixed_length_config() {
    let config = ScaleConfig::from_json_str(
        r#"{ "framing": { "fixed_length": 12, "sync_byte": 2 } }"#,
    )
    .unwrap();
    assert_eq!(
        config.framing.mode(),
        FrameMode::FixedLength {
            length: 12,
            sync_byte: Some(0x02)
        }
    );
}

#[test]
fn test_empty_file_gives_defaults() {
    let file = write_config("{}");
    let config = ScaleConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config, ScaleConfig::default());
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let file = write_config(r#"{ "stability": { "window": 0 } }"#);
    let err = ScaleConfig::from_json_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "stability.window", .. }));

    let file = write_config(r#"{ "supervisor": { "backoff_initial_ms": 500, "backoff_max_ms": 100 } }"#);
    assert!(ScaleConfig::from_json_file(file.path()).is_err());

    let file = write_config(r#"{ "framing": { "terminator": "" } }"#);
    assert!(ScaleConfig::from_json_file(file.path()).is_err());

    let file = write_config(
        r#"{ "supervisor": { "degraded_threshold": 5, "reconnect_after_errors": 5 } }"#,
    );
    let err = ScaleConfig::from_json_file(file.path()).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "supervisor.reconnect_after_errors",
            ..
        }
    ));
}

#[test]
fn test_malformed_json_and_missing_file() {
    let file = write_config("{ not json");
    assert!(matches!(
        ScaleConfig::from_json_file(file.path()),
        Err(ConfigError::Json(_))
    ));
    assert!(matches!(
        ScaleConfig::from_json_file("/nonexistent/scalelink.json"),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn test_config_round_trips_through_json() {
    let mut config = ScaleConfig::for_port("COM7");
    config.format.checksum = ChecksumKind::Xor8;
    let json = serde_json::to_string_pretty(&config).unwrap();
    assert_eq!(ScaleConfig::from_json_str(&json).unwrap(), config);
}
