//! Weight record parsing
//!
//! A [`WeightParser`] is configured with a declared record layout and checksum
//! kind and turns one [`RawFrame`] into one [`WeightReading`]. Parsing is all
//! or nothing: any defect rejects the whole frame.
//!
//! Layouts:
//! - `Signed`: `+0012.5kg,S` (sign, digits, unit, optional `,S`/`,U` marker)
//! - `StatusPrefix`: `F0000.15` where `F` = fixed (stable), `D` = dynamic
//!   (moving), `H`/`L` = no stability information

use crate::checksum::ChecksumKind;
use crate::config::{FormatConfig, RecordLayout};
use crate::error::ParseError;
use crate::frame::RawFrame;
use crate::reading::{StabilitySource, WeightReading, WeightUnit};

/// Frame to reading converter
#[derive(Debug, Clone)]
pub struct WeightParser {
    layout: RecordLayout,
    checksum: ChecksumKind,
    default_unit: WeightUnit,
}

/// Fields decoded from the payload before timestamping
#[derive(Debug, PartialEq)]
struct Fields {
    value: f64,
    unit: WeightUnit,
    stable: Option<bool>,
}

impl WeightParser {
    pub fn new(layout: RecordLayout, checksum: ChecksumKind, default_unit: WeightUnit) -> Self {
        Self {
            layout,
            checksum,
            default_unit,
        }
    }

    pub fn from_config(config: &FormatConfig) -> Self {
        Self::new(config.layout, config.checksum, config.default_unit)
    }

    /// Decode one frame
    pub fn parse(&self, frame: RawFrame) -> Result<WeightReading, ParseError> {
        let payload = self.verify_checksum(&frame.bytes)?;
        let text = std::str::from_utf8(payload)
            .ok()
            .filter(|t| t.is_ascii())
            .ok_or_else(|| ParseError::Malformed("payload is not ASCII".to_string()))?
            .trim();

        let fields = match self.layout {
            RecordLayout::Signed => self.parse_signed(text)?,
            RecordLayout::StatusPrefix => self.parse_status_prefix(text)?,
        };

        let (stable, source) = match fields.stable {
            Some(flag) => (flag, StabilitySource::Device),
            None => (false, StabilitySource::Inferred),
        };

        Ok(WeightReading {
            value: fields.value,
            unit: fields.unit,
            stable,
            source,
            timestamp: frame.completed_at,
        })
    }

    fn verify_checksum<'a>(&self, bytes: &'a [u8]) -> Result<&'a [u8], ParseError> {
        if self.checksum == ChecksumKind::None {
            return Ok(bytes);
        }
        let (payload, carried) = self.checksum.split(bytes).ok_or_else(|| {
            ParseError::Malformed(format!(
                "missing {}-digit checksum trailer",
                self.checksum.trailer_len()
            ))
        })?;
        let computed = self.checksum.compute(payload);
        if carried != computed {
            return Err(ParseError::ChecksumFailed {
                expected: carried,
                actual: computed,
            });
        }
        Ok(payload)
    }

    fn parse_signed(&self, text: &str) -> Result<Fields, ParseError> {
        let (value, rest) = parse_number(text)?;
        let (unit, rest) = self.parse_unit(rest)?;

        let stable = match rest.trim_end() {
            "" => None,
            marker => match marker.strip_prefix(',').map(str::trim) {
                Some(m) if m.eq_ignore_ascii_case("S") => Some(true),
                Some(m) if m.eq_ignore_ascii_case("U") => Some(false),
                _ => {
                    return Err(ParseError::Malformed(format!(
                        "unexpected trailing data {marker:?}"
                    )))
                }
            },
        };

        Ok(Fields {
            value,
            unit,
            stable,
        })
    }

    fn parse_status_prefix(&self, text: &str) -> Result<Fields, ParseError> {
        let mut chars = text.chars();
        let status = chars
            .next()
            .ok_or_else(|| ParseError::Malformed("empty frame".to_string()))?;
        let stable = match status.to_ascii_uppercase() {
            'F' => Some(true),
            'D' => Some(false),
            'H' | 'L' => None,
            other => {
                return Err(ParseError::Malformed(format!(
                    "unknown status prefix {other:?}"
                )))
            }
        };

        let (value, rest) = parse_number(chars.as_str())?;
        let (unit, rest) = self.parse_unit(rest)?;
        if !rest.trim().is_empty() {
            return Err(ParseError::Malformed(format!(
                "unexpected trailing data {rest:?}"
            )));
        }

        Ok(Fields {
            value,
            unit,
            stable,
        })
    }

    /// Optional unit code; the configured default when absent
    fn parse_unit<'a>(&self, text: &'a str) -> Result<(WeightUnit, &'a str), ParseError> {
        let text = text.trim_start();
        let end = text
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(text.len());
        let (code, rest) = text.split_at(end);
        if code.is_empty() {
            return Ok((self.default_unit, rest));
        }
        if rest.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            return Err(ParseError::Malformed(format!(
                "unexpected {code:?} inside number"
            )));
        }
        let unit =
            WeightUnit::from_code(code).ok_or_else(|| ParseError::UnknownUnit(code.to_string()))?;
        Ok((unit, rest))
    }
}

/// Parse `[+|-][ ]*digits[.digits]`, returning the value and the remainder
fn parse_number(text: &str) -> Result<(f64, &str), ParseError> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut pos = 0;
    let mut literal = String::with_capacity(bytes.len());

    match bytes.first() {
        Some(b'-') => {
            literal.push('-');
            pos += 1;
        }
        Some(b'+') => pos += 1,
        _ => {}
    }
    // Some scales pad between sign and digits
    while bytes.get(pos) == Some(&b' ') {
        pos += 1;
    }

    let int_start = pos;
    while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
        pos += 1;
    }
    if pos == int_start {
        return Err(expected_digit(bytes, pos));
    }
    literal.push_str(&text[int_start..pos]);

    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        let frac_start = pos;
        while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
            pos += 1;
        }
        if pos == frac_start {
            return Err(expected_digit(bytes, pos));
        }
        literal.push('.');
        literal.push_str(&text[frac_start..pos]);
    }

    let value = literal
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::Malformed(format!("invalid number {literal:?}")))?;
    Ok((value, &text[pos..]))
}

fn expected_digit(bytes: &[u8], pos: usize) -> ParseError {
    match bytes.get(pos) {
        Some(b) => ParseError::Malformed(format!(
            "expected digit at offset {pos}, found {:?}",
            *b as char
        )),
        None => ParseError::Malformed(format!("expected digit at offset {pos}, found end")),
    }
}
