//! Universal Part Identifiers.
//!
//! A UPI names one graph term on the server. It is either a fixed-width
//! opaque byte body ("stored" form) or a bare integer code. Codes carry
//! the wildcard and null-context sentinels, and inside a result page a
//! strictly negative code is a relative back-reference.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Width of a stored UPI body in bytes.
pub const UPI_WIDTH: usize = 12;

/// Code of the wildcard sentinel.
pub const CODE_WILD: i64 = -1;

/// Code of the null-context sentinel.
pub const CODE_NULL_CONTEXT: i64 = -2;

/// Code of an identifier that has not been assigned yet.
pub const CODE_UNASSIGNED: i64 = -14;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Universal Part Identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Upi {
    /// Globally unique byte body, safe to echo back to the server.
    Stored([u8; UPI_WIDTH]),
    /// Code-only identifier: a sentinel, a row id, or an in-page back-reference.
    Code(i64),
}

impl Upi {
    pub const fn wild() -> Self { Upi::Code(CODE_WILD) }

    pub const fn null_context() -> Self { Upi::Code(CODE_NULL_CONTEXT) }

    pub const fn unassigned() -> Self { Upi::Code(CODE_UNASSIGNED) }

    pub const fn from_bytes(bytes: [u8; UPI_WIDTH]) -> Self { Upi::Stored(bytes) }

    pub fn is_wild(&self) -> bool { matches!(self, Upi::Code(CODE_WILD)) }

    pub fn is_null_context(&self) -> bool { matches!(self, Upi::Code(CODE_NULL_CONTEXT)) }

    pub fn is_unassigned(&self) -> bool { matches!(self, Upi::Code(CODE_UNASSIGNED)) }

    pub fn has_body(&self) -> bool { matches!(self, Upi::Stored(_)) }

    /// True if the identifier may be sent back to the server as a reference.
    pub fn is_storable(&self) -> bool { self.has_body() || self.is_null_context() }

    pub fn bytes(&self) -> Option<&[u8; UPI_WIDTH]> {
        match self {
            Upi::Stored(b) => Some(b),
            Upi::Code(_) => None,
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            Upi::Stored(_) => None,
            Upi::Code(c) => Some(*c),
        }
    }

    /// Negative code without a body: inside a page this points `code` slots back.
    pub fn back_reference(&self) -> Option<i64> {
        match self {
            Upi::Code(c) if *c < 0 => Some(*c),
            _ => None,
        }
    }

    /// Uppercase hex of the byte body, or `code=N` for code-only identifiers.
    pub fn to_hex(&self) -> String {
        match self {
            Upi::Stored(b) => hex(b),
            Upi::Code(c) => format!("code={c}"),
        }
    }

    /// Blank-node number packed little-endian in the first four bytes.
    pub fn blank_node_id(&self) -> Option<u32> {
        self.bytes().map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Hex of the four store-marker bytes (4..8), empty for code-only identifiers.
    pub fn store_bytes_hex(&self) -> String {
        self.bytes().map(|b| hex(&b[4..8])).unwrap_or_default()
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// Ordering: stored bodies compare as signed bytes and sort before any code
// ============================================================================

impl Ord for Upi {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Upi::Stored(a), Upi::Stored(b)) => {
                a.iter().map(|&x| x as i8).cmp(b.iter().map(|&x| x as i8))
            }
            (Upi::Stored(_), Upi::Code(_)) => Ordering::Less,
            (Upi::Code(_), Upi::Stored(_)) => Ordering::Greater,
            (Upi::Code(a), Upi::Code(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Upi {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl fmt::Display for Upi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upi::Stored(_) => write!(f, "<UPI {}>", self.to_hex()),
            Upi::Code(CODE_NULL_CONTEXT) => Ok(()),
            Upi::Code(c) => write!(f, "<UPI code={c}>"),
        }
    }
}

impl From<[u8; UPI_WIDTH]> for Upi {
    fn from(b: [u8; UPI_WIDTH]) -> Self { Upi::Stored(b) }
}

// ============================================================================
// UpiBuilder
// ============================================================================

/// Assembles a stored UPI one wire byte at a time.
#[derive(Debug, Default)]
pub struct UpiBuilder {
    buf: [u8; UPI_WIDTH],
    len: usize,
    sealed: bool,
}

impl UpiBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn is_complete(&self) -> bool { self.len == UPI_WIDTH }

    /// Append one byte of the body.
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.sealed {
            return Err(Error::State("UPI is already finalized".into()));
        }
        if self.len == UPI_WIDTH {
            return Err(Error::State(format!("UPI bytes are all there ({UPI_WIDTH})")));
        }
        self.buf[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Seal the builder and produce the identifier.
    pub fn finish(&mut self) -> Result<Upi> {
        if self.sealed {
            return Err(Error::State("UPI is already finalized".into()));
        }
        if self.len != UPI_WIDTH {
            return Err(Error::State(format!(
                "UPI has {} of {UPI_WIDTH} bytes", self.len
            )));
        }
        self.sealed = true;
        Ok(Upi::Stored(self.buf))
    }
}
