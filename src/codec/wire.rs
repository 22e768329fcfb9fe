//! Binary identifier sequences as they arrive from the server.
//!
//! A sequence is a tagged-integer count followed by that many entries:
//!
//! | Lead byte | Entry |
//! |-----------|-------|
//! | `0x80..0xC0` | tagged integer → `Upi::Code` |
//! | `0xD3` | UPI body, 12 raw bytes |
//! | `0xD4` `j` | duplicate of the entry `j` places back |
//! | `0xD5` `j` `n` | `n` copies of the entry `j` places back |
//!
//! Tagged integers keep small magnitudes in the tag byte itself; larger
//! ones follow as 1–8 little-endian bytes. Bit `0x20` marks a negative
//! value stored as `-(v + 1)`.

use bytes::{Buf, BufMut};
use hashbrown::HashMap;

use crate::model::{Upi, UpiBuilder, UPI_WIDTH};
use crate::{Error, Result};

pub const TAG_INT_START: u8 = 0x80;
pub const TAG_INT_END: u8 = 0xC0;
pub const TAG_NULL: u8 = 0xC0;
pub const TAG_UPI: u8 = 0xD3;
pub const TAG_DUP: u8 = 0xD4;
pub const TAG_REP: u8 = 0xD5;

const TAG_SIGN_MASK: u8 = 0x20;
const TAG_VALUE_MASK: u8 = 0x3f;
const TAG_IMM_TOP: u8 = 23;
const RUN_MIN: usize = 2;

/// Reads entries from a buffer, remembering where it started for error offsets.
struct Reader<'a, B: Buf> {
    buf: &'a mut B,
    start: usize,
}

impl<'a, B: Buf> Reader<'a, B> {
    fn new(buf: &'a mut B) -> Self {
        let start = buf.remaining();
        Self { buf, start }
    }

    fn offset(&self) -> usize { self.start - self.buf.remaining() }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Wire { offset: self.offset(), message: message.into() }
    }

    fn byte(&mut self) -> Result<u8> {
        if !self.buf.has_remaining() {
            return Err(self.error("unexpected end of input"));
        }
        Ok(self.buf.get_u8())
    }

    fn int(&mut self) -> Result<i64> {
        let tag = self.byte()?;
        self.int_body(tag)
    }

    fn int_body(&mut self, tag: u8) -> Result<i64> {
        if !(TAG_INT_START..TAG_INT_END).contains(&tag) {
            return Err(self.error(format!("tag 0x{tag:02x} is not an integer")));
        }
        let mut s = tag & TAG_VALUE_MASK;
        if s < TAG_IMM_TOP {
            return Ok(s as i64);
        }
        let negative = s & TAG_SIGN_MASK != 0;
        if negative {
            s -= TAG_SIGN_MASK;
            if s < TAG_IMM_TOP {
                return Ok(-(s as i64) - 1);
            }
        }
        let count = (s - TAG_IMM_TOP + 1) as usize;
        if count > 8 {
            return Err(self.error(format!("integer payload of {count} bytes")));
        }
        if self.buf.remaining() < count {
            return Err(self.error("integer payload truncated"));
        }
        let mut v = self.buf.get_uint_le(count);
        if count == 1 {
            v += TAG_IMM_TOP as u64;
        }
        let v = i64::try_from(v).map_err(|_| self.error("integer does not fit in 64 bits"))?;
        Ok(if negative { -v - 1 } else { v })
    }

    fn back_index(&mut self, len: usize) -> Result<usize> {
        let j = self.int()?;
        if j < 1 || j as usize > len {
            return Err(self.error(format!("back index {j} outside {len} decoded entries")));
        }
        Ok(len - j as usize)
    }
}

/// Decode a counted identifier sequence.
pub fn decode_upis<B: Buf>(buf: &mut B) -> Result<Vec<Upi>> {
    let mut r = Reader::new(buf);
    let count = r.int()?;
    let count = usize::try_from(count).map_err(|_| r.error(format!("negative count {count}")))?;
    let mut out: Vec<Upi> = Vec::with_capacity(count.min(1 << 16));

    while out.len() < count {
        let tag = r.byte()?;
        match tag {
            TAG_UPI => {
                if r.buf.remaining() < UPI_WIDTH {
                    return Err(r.error("UPI body truncated"));
                }
                let mut b = UpiBuilder::new();
                for _ in 0..UPI_WIDTH {
                    b.push(r.buf.get_u8())?;
                }
                out.push(b.finish()?);
            }
            TAG_DUP => {
                let src = r.back_index(out.len())?;
                out.push(out[src]);
            }
            TAG_REP => {
                let src = r.back_index(out.len())?;
                let n = r.int()?;
                if n < 0 || out.len() + n as usize > count {
                    return Err(r.error(format!("repeat count {n} overruns sequence of {count}")));
                }
                let v = out[src];
                out.extend(std::iter::repeat_n(v, n as usize));
            }
            TAG_NULL => return Err(r.error("null entry in identifier sequence")),
            t if (TAG_INT_START..TAG_INT_END).contains(&t) => {
                let code = r.int_body(t)?;
                out.push(Upi::Code(code));
            }
            t => return Err(r.error(format!("unexpected tag 0x{t:02x}"))),
        }
    }
    Ok(out)
}

/// Write a tagged integer.
pub fn put_int<B: BufMut>(out: &mut B, x: i64) {
    let (mut v, sign) = if x < 0 { ((-(x + 1)) as u64, TAG_SIGN_MASK) } else { (x as u64, 0) };
    if v < TAG_IMM_TOP as u64 {
        out.put_u8(TAG_INT_START | sign | v as u8);
        return;
    }
    let len = if v < 0x100 + TAG_IMM_TOP as u64 {
        v -= TAG_IMM_TOP as u64;
        1
    } else {
        (64 - v.leading_zeros() as usize).div_ceil(8).max(2)
    };
    out.put_u8(TAG_INT_START | sign | (TAG_IMM_TOP + len as u8 - 1));
    out.put_uint_le(v, len);
}

/// Encode a counted identifier sequence, compressing repeats.
pub fn encode_upis<B: BufMut>(out: &mut B, upis: &[Upi]) {
    put_int(out, upis.len() as i64);
    let mut last_seen: HashMap<[u8; UPI_WIDTH], usize> = HashMap::new();
    let mut i = 0;
    while i < upis.len() {
        let u = upis[i];
        if i > 0 && upis[i - 1] == u {
            let run = upis[i..].iter().take_while(|x| **x == u).count();
            if run >= RUN_MIN {
                out.put_u8(TAG_REP);
                put_int(out, 1);
                put_int(out, run as i64);
                i += run;
                continue;
            }
        }
        match u {
            Upi::Stored(bytes) => {
                match last_seen.insert(bytes, i) {
                    Some(prev) => {
                        out.put_u8(TAG_DUP);
                        put_int(out, (i - prev) as i64);
                    }
                    None => {
                        out.put_u8(TAG_UPI);
                        out.put_slice(&bytes);
                    }
                }
            }
            Upi::Code(c) => put_int(out, c),
        }
        i += 1;
    }
}
