//! The cat speak alphabet.
//!
//! Four base-4 digits pair up with four symbols. The pairing is a single
//! self-inverse table: [`swap`] turns digits into symbols and the same call
//! turns symbols back into digits.

/// Marks that the preceding digit stands for three copies of itself.
pub const ESCAPE: char = '~';

/// Digit characters, indexed by value.
pub const DIGITS: [char; 4] = ['0', '1', '2', '3'];

/// Symbol characters, indexed by the value of the digit they replace.
pub const SYMBOLS: [char; 4] = ['喵', '呜', '咪', '嗷'];

/// Swap a digit for its symbol or a symbol for its digit.
///
/// Any other character, including [`ESCAPE`], is returned unchanged.
/// `swap(swap(c)) == c` holds for every `char`.
pub fn swap(c: char) -> char {
    if let Some(i) = DIGITS.iter().position(|&d| d == c) {
        return SYMBOLS[i];
    }
    if let Some(i) = SYMBOLS.iter().position(|&s| s == c) {
        return DIGITS[i];
    }
    c
}

/// Apply [`swap`] to every character of `s`.
pub fn translate(s: &str) -> String {
    s.chars().map(swap).collect()
}

/// Value of a digit character, or `None` if `c` is not `'0'..='3'`.
pub fn digit_value(c: char) -> Option<u8> {
    match c {
        '0'..='3' => Some(c as u8 - b'0'),
        _ => None,
    }
}

/// Digit character for a value in `0..4`.
///
/// Only the two low bits of `value` are used.
pub fn digit_char(value: u8) -> char {
    DIGITS[usize::from(value & 3)]
}

/// Whether `c` can appear in an encoded symbol string.
pub fn is_symbol_char(c: char) -> bool {
    c == ESCAPE || SYMBOLS.contains(&c)
}
