//! Codecs for the two encodings a result page carries: binary identifier
//! sequences and textual def-strings (with their base-50 numerals).

pub mod base50;
pub mod defs;
pub mod wire;

pub use defs::{decode_def, decode_all, encode_def, is_pass, DefEncoder};
pub use wire::{decode_upis, encode_upis};
