//! Frame decoding
//!
//! Splits the raw byte stream into frames. Chunk boundaries carry no meaning:
//! feeding a stream in one piece or byte by byte yields the same frames and
//! the same framing errors.
//!
//! Terminator mode: a run of unterminated bytes longer than `max_frame_len`
//! is dropped, a [`FramingError::Overflow`] is reported, and everything up to
//! and including the next terminator is skipped so the decoder restarts on a
//! frame boundary.
//!
//! Fixed-length mode: every `length` bytes form a frame. With a sync byte,
//! bytes before it are dropped and reported once as [`FramingError::Garbage`].
//!
//! Trimming only strips CR/LF left over from the line ending. Padding inside
//! the record may be covered by a checksum and is left to the parser.

use chrono::{DateTime, Utc};

use crate::config::{FrameMode, FramingConfig};
use crate::error::FramingError;

/// One complete frame as received from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Frame bytes with the terminator removed
    pub bytes: Vec<u8>,
    /// When the final byte of the frame was decoded
    pub completed_at: DateTime<Utc>,
}

impl RawFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            completed_at: Utc::now(),
        }
    }

    /// Frame as text for logging
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Incremental frame decoder
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    mode: FrameMode,
    max_frame_len: usize,
    trim: bool,
    buffer: Vec<u8>,
    /// Skipping input until the next terminator after an overflow
    discarding: bool,
    /// Bytes dropped while hunting for the sync byte
    garbage: usize,
}

impl FrameDecoder {
    pub fn new(mode: FrameMode, max_frame_len: usize, trim: bool) -> Self {
        Self {
            mode,
            max_frame_len,
            trim,
            buffer: Vec::with_capacity(max_frame_len),
            discarding: false,
            garbage: 0,
        }
    }

    pub fn from_config(config: &FramingConfig) -> Self {
        Self::new(config.mode(), config.max_frame_len, config.trim)
    }

    /// Append a chunk and iterate the frames it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { decoder: self }
    }

    /// Number of bytes waiting for a frame boundary
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all partial state, e.g. after the link was reopened
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
        self.garbage = 0;
    }

    /// Extract the next complete frame from buffered input, if any
    pub fn next_frame(&mut self) -> Option<Result<RawFrame, FramingError>> {
        match &self.mode {
            FrameMode::Terminator(terminator) => {
                let terminator = terminator.clone();
                self.next_terminated(&terminator)
            }
            FrameMode::FixedLength { length, sync_byte } => {
                let (length, sync_byte) = (*length, *sync_byte);
                self.next_fixed(length, sync_byte)
            }
        }
    }

    fn next_terminated(&mut self, terminator: &[u8]) -> Option<Result<RawFrame, FramingError>> {
        let tlen = terminator.len();
        loop {
            let found = find(&self.buffer, terminator);

            if self.discarding {
                match found {
                    Some(pos) => {
                        self.buffer.drain(..pos + tlen);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        // Keep a possible partial terminator
                        let keep = self.buffer.len().min(tlen - 1);
                        let drop = self.buffer.len() - keep;
                        self.buffer.drain(..drop);
                        return None;
                    }
                }
            }

            match found {
                Some(pos) if pos <= self.max_frame_len => {
                    let bytes: Vec<u8> = self.buffer.drain(..pos).collect();
                    self.buffer.drain(..tlen);
                    if let Some(frame) = self.finish(bytes) {
                        return Some(Ok(frame));
                    }
                }
                // A terminator starting past the limit, or enough bytes that one
                // could no longer start within it
                Some(_) => return Some(Err(self.overflow())),
                None if self.buffer.len() >= self.max_frame_len + tlen => {
                    return Some(Err(self.overflow()));
                }
                None => return None,
            }
        }
    }

    fn overflow(&mut self) -> FramingError {
        self.buffer.drain(..self.max_frame_len + 1);
        self.discarding = true;
        FramingError::Overflow {
            limit: self.max_frame_len,
        }
    }

    fn next_fixed(
        &mut self,
        length: usize,
        sync_byte: Option<u8>,
    ) -> Option<Result<RawFrame, FramingError>> {
        loop {
            if let Some(sync) = sync_byte {
                match self.buffer.iter().position(|b| *b == sync) {
                    Some(0) => {}
                    Some(pos) => {
                        self.buffer.drain(..pos);
                        self.garbage += pos;
                    }
                    None => {
                        self.garbage += self.buffer.len();
                        self.buffer.clear();
                        return None;
                    }
                }
                if self.garbage > 0 {
                    let discarded = std::mem::take(&mut self.garbage);
                    return Some(Err(FramingError::Garbage { discarded }));
                }
            }

            if self.buffer.len() < length {
                return None;
            }
            let bytes: Vec<u8> = self.buffer.drain(..length).collect();
            if let Some(frame) = self.finish(bytes) {
                return Some(Ok(frame));
            }
        }
    }

    /// Apply trimming; blank frames are dropped
    fn finish(&self, bytes: Vec<u8>) -> Option<RawFrame> {
        let bytes = if self.trim {
            trim_line_residue(&bytes).to_vec()
        } else {
            bytes
        };
        if bytes.is_empty() || (self.trim && bytes.iter().all(u8::is_ascii_whitespace)) {
            None
        } else {
            Some(RawFrame::new(bytes))
        }
    }
}

/// Lazy iterator over the frames completed by a [`FrameDecoder::feed`] call
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<RawFrame, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn is_line_residue(b: &u8) -> bool {
    matches!(b, b'\r' | b'\n')
}

fn trim_line_residue(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !is_line_residue(b))
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !is_line_residue(b))
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
