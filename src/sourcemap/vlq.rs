//! Base64 VLQ codec for the `mappings` field of a v3 source map
//!
//! Decoding produces absolute positions; encoding turns them back into the
//! relative, delta-coded form. Generated columns reset on every line, all
//! other fields carry over across lines.

use thiserror::Error;

const BASE64_CHARS: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const VLQ_SHIFT: u32 = 5;
const VLQ_CONTINUATION: u64 = 1 << VLQ_SHIFT;
const VLQ_MASK: u64 = VLQ_CONTINUATION - 1;

/// Errors while decoding a `mappings` string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingsError {
    #[error("invalid base64 character '{0}' in mappings")]
    InvalidChar(char),

    #[error("mappings end in the middle of a VLQ value")]
    Truncated,

    #[error("VLQ value overflows")]
    Overflow,

    #[error("segment has {0} fields, expected 1, 4 or 5")]
    SegmentLength(usize),

    #[error("segment decodes to a negative position")]
    Negative,
}

/// Position in an original source a generated column maps back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginalPosition {
    pub source: u32,
    pub line: u32,
    pub column: u32,
    pub name: Option<u32>,
}

/// One decoded segment of a generated line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub generated_column: u32,
    pub original: Option<OriginalPosition>,
}

impl Segment {
    pub fn new(generated_column: u32, original: Option<OriginalPosition>) -> Self {
        Self {
            generated_column,
            original,
        }
    }
}

/// Decoded mappings, indexed by generated line
pub type Lines = Vec<Vec<Segment>>;

fn base64_value(byte: u8) -> Option<u64> {
    let value = match byte {
        b'A'..=b'Z' => byte - b'A',
        b'a'..=b'z' => byte - b'a' + 26,
        b'0'..=b'9' => byte - b'0' + 52,
        b'+' => 62,
        b'/' => 63,
        _ => return None,
    };
    Some(u64::from(value))
}

fn decode_value(bytes: &[u8], pos: &mut usize) -> Result<i64, MappingsError> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        let byte = *bytes.get(*pos).ok_or(MappingsError::Truncated)?;
        *pos += 1;
        let digit = base64_value(byte).ok_or(MappingsError::InvalidChar(byte as char))?;

        // Only four bits of the thirteenth digit fit into 64 bits
        if shift > 60 || (shift == 60 && (digit & VLQ_MASK) >> 4 != 0) {
            return Err(MappingsError::Overflow);
        }
        result |= (digit & VLQ_MASK) << shift;

        if digit & VLQ_CONTINUATION == 0 {
            break;
        }
        shift += VLQ_SHIFT;
    }

    let magnitude = (result >> 1) as i64;
    Ok(if result & 1 == 1 { -magnitude } else { magnitude })
}

fn encode_value(out: &mut String, value: i64) {
    let mut vlq: u64 = if value < 0 {
        (value.unsigned_abs() << 1) | 1
    } else {
        (value as u64) << 1
    };

    loop {
        let mut digit = vlq & VLQ_MASK;
        vlq >>= VLQ_SHIFT;
        if vlq > 0 {
            digit |= VLQ_CONTINUATION;
        }
        out.push(BASE64_CHARS[digit as usize] as char);
        if vlq == 0 {
            break;
        }
    }
}

fn apply(base: &mut i64, delta: i64) -> Result<u32, MappingsError> {
    *base = base.checked_add(delta).ok_or(MappingsError::Overflow)?;
    u32::try_from(*base).map_err(|_| MappingsError::Negative)
}

/// Decode a `mappings` string into absolute segments per generated line
pub fn decode(mappings: &str) -> Result<Lines, MappingsError> {
    let bytes = mappings.as_bytes();
    let mut lines: Lines = vec![Vec::new()];

    let mut source = 0i64;
    let mut line = 0i64;
    let mut column = 0i64;
    let mut name = 0i64;
    let mut generated_column = 0i64;

    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b';' => {
                lines.push(Vec::new());
                generated_column = 0;
                pos += 1;
            }
            b',' => pos += 1,
            _ => {
                let mut fields = [0i64; 5];
                let mut count = 0;
                while pos < bytes.len() && bytes[pos] != b',' && bytes[pos] != b';' {
                    if count == fields.len() {
                        return Err(MappingsError::SegmentLength(count + 1));
                    }
                    fields[count] = decode_value(bytes, &mut pos)?;
                    count += 1;
                }

                let gen = apply(&mut generated_column, fields[0])?;
                let original = match count {
                    1 => None,
                    4 | 5 => Some(OriginalPosition {
                        source: apply(&mut source, fields[1])?,
                        line: apply(&mut line, fields[2])?,
                        column: apply(&mut column, fields[3])?,
                        name: if count == 5 {
                            Some(apply(&mut name, fields[4])?)
                        } else {
                            None
                        },
                    }),
                    n => return Err(MappingsError::SegmentLength(n)),
                };

                if let Some(current) = lines.last_mut() {
                    current.push(Segment::new(gen, original));
                }
            }
        }
    }

    Ok(lines)
}

/// Encode absolute segments back into a `mappings` string
pub fn encode(lines: &[Vec<Segment>]) -> String {
    let mut out = String::new();

    let mut source = 0i64;
    let mut line = 0i64;
    let mut column = 0i64;
    let mut name = 0i64;

    for (index, segments) in lines.iter().enumerate() {
        if index > 0 {
            out.push(';');
        }

        let mut generated_column = 0i64;
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }

            let gen = i64::from(segment.generated_column);
            encode_value(&mut out, gen - generated_column);
            generated_column = gen;

            if let Some(original) = segment.original {
                encode_value(&mut out, i64::from(original.source) - source);
                source = i64::from(original.source);
                encode_value(&mut out, i64::from(original.line) - line);
                line = i64::from(original.line);
                encode_value(&mut out, i64::from(original.column) - column);
                column = i64::from(original.column);

                if let Some(n) = original.name {
                    encode_value(&mut out, i64::from(n) - name);
                    name = i64::from(n);
                }
            }
        }
    }

    out
}
