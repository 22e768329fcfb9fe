//! Base-50 numerals used inside def-strings.
//!
//! Digits are `0-9a-tA-T`, most significant first, and a run always ends
//! with `X` (either case). `X` is not a digit, so it can never be mistaken
//! for one.

use crate::{Error, Result};

/// The 50 digit symbols in value order.
pub const ALPHABET: &[u8; 50] = b"0123456789abcdefghijklmnopqrstABCDEFGHIJKLMNOPQRST";

pub const BASE: usize = 50;

/// Value of a single digit.
pub fn digit_value(c: char) -> Option<usize> {
    match c {
        '0'..='9' => Some(c as usize - '0' as usize),
        'a'..='t' => Some(c as usize - 'a' as usize + 10),
        'A'..='T' => Some(c as usize - 'A' as usize + 30),
        _ => None,
    }
}

fn is_terminator(c: char) -> bool { c == 'X' || c == 'x' }

/// Parse a digit run of `def` beginning at byte offset `start`.
///
/// Returns the value and the byte offset just past the terminating `X`.
pub fn parse_run(def: &str, start: usize) -> Result<(usize, usize)> {
    let tail = def.get(start..).ok_or_else(|| malformed(def, "number starts past end"))?;
    let mut value: usize = 0;
    for (i, c) in tail.char_indices() {
        if is_terminator(c) {
            return Ok((value, start + i + c.len_utf8()));
        }
        let digit = digit_value(c)
            .ok_or_else(|| malformed(def, &format!("'{c}' is not a base-50 digit")))?;
        value = value
            .checked_mul(BASE)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| malformed(def, "base-50 number overflows"))?;
    }
    Err(malformed(def, "base-50 number has no terminating X"))
}

/// Encode `n` without the terminator.
pub fn encode(mut n: usize) -> String {
    if n == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(ALPHABET[n % BASE]);
        n /= BASE;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

/// Encode `n` followed by the `X` terminator.
pub fn encode_run(n: usize) -> String {
    let mut s = encode(n);
    s.push('X');
    s
}

fn malformed(def: &str, message: &str) -> Error {
    Error::Decode { input: def.to_owned(), message: message.to_owned() }
}
