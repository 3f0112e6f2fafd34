//! Raw byte tracing
//!
//! Dumps every chunk read from the device as hex plus JSON-escaped text. Used
//! when commissioning a new scale model to see exactly what it transmits.

use std::fmt;

use serde::Serialize;

/// Tracing target for raw chunk dumps
pub const TRACE_TARGET: &str = "scalelink::trace";

/// Hex and text rendering of one received chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkDump {
    /// Lowercase hex, two characters per byte
    pub hex: String,
    /// Lossy UTF-8 text as a JSON string literal, so control bytes stay visible
    pub text: String,
}

impl ChunkDump {
    pub fn new(chunk: &[u8]) -> Self {
        let text = String::from_utf8_lossy(chunk).into_owned();
        Self {
            hex: hex::encode(chunk),
            text: serde_json::Value::String(text).to_string(),
        }
    }
}

impl fmt::Display for ChunkDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HEX: {}\nTXT: {}", self.hex, self.text)
    }
}

/// Emit a chunk on [`TRACE_TARGET`]
pub fn log_chunk(port: &str, chunk: &[u8]) {
    let dump = ChunkDump::new(chunk);
    tracing::info!(
        target: TRACE_TARGET,
        port,
        len = chunk.len(),
        hex = %dump.hex,
        text = %dump.text,
        "raw chunk"
    );
}
