//! Frame checksums
//!
//! Checksums travel as an ASCII hex trailer at the end of the frame so the
//! checksum byte can never collide with the frame terminator.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Checksum algorithm appended to each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    /// Frames carry no checksum
    #[default]
    None,
    /// XOR of all payload bytes, 2 hex digits
    Xor8,
    /// Sum of all payload bytes modulo 256, 2 hex digits
    Sum8,
    /// CRC-32 (IEEE) of the payload, 8 hex digits
    Crc32,
}

impl ChecksumKind {
    /// Number of ASCII hex characters the trailer occupies
    pub fn trailer_len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Xor8 | Self::Sum8 => 2,
            Self::Crc32 => 8,
        }
    }

    /// Compute the checksum of `payload`
    pub fn compute(&self, payload: &[u8]) -> u32 {
        match self {
            Self::None => 0,
            Self::Xor8 => payload.iter().fold(0u8, |acc, b| acc ^ b) as u32,
            Self::Sum8 => payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) as u32,
            Self::Crc32 => {
                let mut hasher = Hasher::new();
                hasher.update(payload);
                hasher.finalize()
            }
        }
    }

    /// Render the trailer for `payload` (uppercase hex)
    pub fn trailer(&self, payload: &[u8]) -> String {
        match self {
            Self::None => String::new(),
            Self::Xor8 | Self::Sum8 => format!("{:02X}", self.compute(payload)),
            Self::Crc32 => format!("{:08X}", self.compute(payload)),
        }
    }

    /// Return `payload` with its checksum trailer appended
    pub fn append(&self, payload: &[u8]) -> Vec<u8> {
        let mut framed = payload.to_vec();
        framed.extend_from_slice(self.trailer(payload).as_bytes());
        framed
    }

    /// Split a frame into payload and the checksum value it carries.
    ///
    /// Returns `None` if the frame is too short or the trailer is not hex.
    pub fn split<'a>(&self, frame: &'a [u8]) -> Option<(&'a [u8], u32)> {
        let len = self.trailer_len();
        if len == 0 {
            return Some((frame, 0));
        }
        if frame.len() <= len {
            return None;
        }
        let (payload, trailer) = frame.split_at(frame.len() - len);
        if !trailer.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        let text = std::str::from_utf8(trailer).ok()?;
        let value = u32::from_str_radix(text, 16).ok()?;
        Some((payload, value))
    }
}
