//! Cat speak encoding and decoding.
//!
//! Encoding runs four stages over a text value:
//!
//! 1. UTF-8 bytes (no byte-order mark)
//! 2. Four base-4 digits per byte, least significant bit pair first
//! 3. Run compression: each left-to-right triple of equal digits becomes
//!    `digit~`
//! 4. Digit to symbol substitution via [`alphabet::swap`]
//!
//! Decoding undoes the stages in reverse. Characters outside the alphabet
//! and stray markers pass through to grouping; a trailing group of fewer
//! than four characters is dropped, and only a complete group holding a
//! non-digit is rejected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::alphabet::{self, digit_char, digit_value, ESCAPE};
use crate::error::CodecError;

/// Digits produced per input byte.
pub const DIGITS_PER_BYTE: usize = 4;

/// Bit offset of each digit within its byte, in emission order.
const BIT_OFFSETS: [u32; DIGITS_PER_BYTE] = [0, 2, 4, 6];

/// Length of a run that collapses into `digit~`.
const RUN_LENGTH: usize = 3;

/// Encode text into a symbol string.
///
/// Returns an empty string for empty input. Never fails: a `&str` is
/// always valid UTF-8. Use [`encode_bytes`] for raw input.
pub fn encode(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let digits = bytes_to_digits(text.as_bytes());
    alphabet::translate(&compress_runs(&digits))
}

/// Encode raw bytes that are expected to be UTF-8 text.
///
/// # Errors
///
/// Returns [`CodecError::Encoding`] if `bytes` is not valid UTF-8.
pub fn encode_bytes(bytes: &[u8]) -> Result<String, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(CodecError::Encoding)?;
    Ok(encode(text))
}

/// Decode a symbol string back into text.
///
/// `"呜喵喵呜\n"` decodes to `"A"`: the newline only starts a group that is
/// never completed.
///
/// # Errors
///
/// - [`CodecError::UnexpectedCharacter`] for a complete group holding a
///   character that is not a symbol, reported as it appears in `symbols`
/// - [`CodecError::InvalidUtf8`] if the reconstructed bytes are not UTF-8
pub fn decode(symbols: &str) -> Result<String, CodecError> {
    if symbols.is_empty() {
        return Ok(String::new());
    }

    let digits = expand_indexed(&alphabet::translate(symbols));
    let bytes = assemble_bytes(&digits).map_err(|(ch, position)| {
        CodecError::UnexpectedCharacter {
            ch: alphabet::swap(ch),
            position,
        }
    })?;
    String::from_utf8(bytes).map_err(CodecError::InvalidUtf8)
}

/// Split each byte into four digits at bit offsets 0, 2, 4 and 6.
pub fn bytes_to_digits(bytes: &[u8]) -> String {
    let mut digits = String::with_capacity(bytes.len() * DIGITS_PER_BYTE);
    for &byte in bytes {
        for shift in BIT_OFFSETS {
            digits.push(digit_char(byte >> shift));
        }
    }
    digits
}

/// Collapse runs of three equal digits into `digit~`.
///
/// The scan is a single left-to-right pass over non-overlapping triples:
/// `"0000"` becomes `"0~0"` and `"000000"` becomes `"0~0~"`. Characters
/// other than digits are copied through.
pub fn compress_runs(digits: &str) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(digits.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let is_run = digit_value(c).is_some()
            && chars.len() - i >= RUN_LENGTH
            && chars[i + 1] == c
            && chars[i + 2] == c;

        out.push(c);
        if is_run {
            out.push(ESCAPE);
            i += RUN_LENGTH;
        } else {
            i += 1;
        }
    }

    out
}

/// Expand every `digit~` back into three copies of the digit.
///
/// A marker repeats only the digit right before it, and only if an earlier
/// marker has not consumed that digit. Any other marker is copied through,
/// as is every character that is not a digit: `"0~~"` becomes `"000~"`.
pub fn expand_runs(compressed: &str) -> String {
    expand_indexed(compressed)
        .into_iter()
        .map(|(c, _)| c)
        .collect()
}

/// [`expand_runs`], keeping the source char index of every output char.
fn expand_indexed(compressed: &str) -> Vec<(char, usize)> {
    let mut out = Vec::with_capacity(compressed.len());
    let mut pending = None;

    for (position, c) in compressed.chars().enumerate() {
        match pending.take() {
            Some(digit) if c == ESCAPE => {
                out.push((digit, position));
                out.push((digit, position));
                continue;
            }
            _ => {}
        }
        if digit_value(c).is_some() {
            pending = Some(c);
        }
        out.push((c, position));
    }

    out
}

/// Rebuild bytes from groups of four digits, least significant first.
///
/// A trailing group of fewer than four characters is dropped whatever it
/// holds.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedCharacter`] for a complete group that
/// holds a non-digit. Positions are char indices into `digits`.
pub fn digits_to_bytes(digits: &str) -> Result<Vec<u8>, CodecError> {
    let indexed: Vec<(char, usize)> = digits.chars().zip(0..).collect();
    assemble_bytes(&indexed)
        .map_err(|(ch, position)| CodecError::UnexpectedCharacter { ch, position })
}

/// Fold each complete group of four into a byte, or return the first
/// non-digit found in one.
fn assemble_bytes(digits: &[(char, usize)]) -> Result<Vec<u8>, (char, usize)> {
    digits
        .chunks_exact(DIGITS_PER_BYTE)
        .map(|group| {
            group
                .iter()
                .zip(BIT_OFFSETS)
                .try_fold(0u8, |byte, (&(c, position), shift)| {
                    let digit = digit_value(c).ok_or((c, position))?;
                    Ok(byte | (digit << shift))
                })
        })
        .collect()
}

/// Which way a conversion runs.
///
/// This is the string boundary used by the assistant: [`Direction::render`]
/// always yields a string, with failures formatted as a tagged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Text to cat speak.
    Encode,
    /// Cat speak to text.
    Decode,
}

impl Direction {
    /// Run the codec in this direction.
    ///
    /// # Errors
    ///
    /// Propagates the [`CodecError`] from [`decode`]. Encoding a `&str`
    /// never fails.
    pub fn apply(self, input: &str) -> Result<String, CodecError> {
        match self {
            Direction::Encode => Ok(encode(input)),
            Direction::Decode => decode(input),
        }
    }

    /// Run the codec on raw bytes, validating UTF-8 first.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encoding`] for non-UTF-8 input, otherwise as
    /// [`Direction::apply`].
    pub fn apply_bytes(self, input: &[u8]) -> Result<String, CodecError> {
        match self {
            Direction::Encode => encode_bytes(input),
            Direction::Decode => {
                let text = std::str::from_utf8(input).map_err(CodecError::Encoding)?;
                decode(text)
            }
        }
    }

    /// Run the codec and format any failure as `"[<direction> error: ...]"`.
    pub fn render(self, input: &str) -> String {
        self.apply(input)
            .unwrap_or_else(|err| self.format_error(&err))
    }

    /// Like [`Direction::render`] for raw bytes.
    pub fn render_bytes(self, input: &[u8]) -> String {
        self.apply_bytes(input)
            .unwrap_or_else(|err| self.format_error(&err))
    }

    /// Tagged error string for a failure in this direction.
    pub fn format_error(self, err: &CodecError) -> String {
        format!("{}{}]", self.error_prefix(), err)
    }

    /// Prefix that marks a rendered failure.
    pub fn error_prefix(self) -> &'static str {
        match self {
            Direction::Encode => "[encode error: ",
            Direction::Decode => "[decode error: ",
        }
    }

    /// Short confirmation shown after a successful submission.
    pub fn confirmation(self) -> &'static str {
        match self {
            Direction::Encode => "Converted to cat speak, meow!",
            Direction::Decode => "Restored, meow!",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Encode => write!(f, "encode"),
            Direction::Decode => write!(f, "decode"),
        }
    }
}

/// Whether a rendered string is a tagged failure rather than a result.
pub fn is_error_result(rendered: &str) -> bool {
    [Direction::Encode, Direction::Decode]
        .iter()
        .any(|d| rendered.starts_with(d.error_prefix()) && rendered.ends_with(']'))
}
