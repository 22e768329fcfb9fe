//! One fetched batch of rows.
//!
//! The wire array is a flat run of fixed-length cycles, one per row:
//!
//! ```text
//! [row-id s p o (c)] [row-id s p o (c)] ... [continuation]
//! ```
//!
//! A code-only slot with a strictly negative code repeats the slot `code`
//! places earlier. Those links are resolved once, when the page is built,
//! into a side table of canonical slot indices, so every accessor reads
//! through the same path. Def-strings are paired with canonical term
//! slots in order (`%P` padding skipped) and decoded only when a slot is
//! asked for its term.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::codec::defs::{decode_def, is_pass};
use crate::model::{Part, Term, Upi};
use crate::{Error, Result};

/// Number of term slots per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Arity {
    /// subject, predicate, object
    Triples,
    /// subject, predicate, object, context
    #[default]
    Quads,
}

impl Arity {
    pub fn parts(self) -> usize {
        match self {
            Arity::Triples => 3,
            Arity::Quads => 4,
        }
    }

    /// Slots per row, including the row id.
    pub fn cycle(self) -> usize { self.parts() + 1 }

    pub fn has(self, part: Part) -> bool { part.offset() <= self.parts() }
}

/// What the trailing marker says about rows beyond this page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Continuation {
    /// The server holds more rows for this cursor.
    More,
    /// Nothing left.
    Exhausted,
    /// Nothing left because the server dropped `discarded` rows at its limit.
    Truncated { discarded: u64 },
}

impl Continuation {
    pub fn from_code(code: i64) -> Self {
        match code {
            c if c > 0 => Continuation::More,
            0 => Continuation::Exhausted,
            c => Continuation::Truncated { discarded: c.unsigned_abs() },
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Continuation::More => 1,
            Continuation::Exhausted => 0,
            Continuation::Truncated { discarded } => -(discarded.min(i64::MAX as u64) as i64),
        }
    }

    pub fn has_more(self) -> bool { matches!(self, Continuation::More) }

    pub fn is_truncated(self) -> bool { matches!(self, Continuation::Truncated { .. }) }
}

#[derive(Debug)]
struct PageTerms {
    defs: Vec<String>,
    /// canonical slot → index into `defs`
    def_index: Vec<Option<usize>>,
    cache: Vec<OnceLock<Term>>,
}

/// Decoded page, immutable once built apart from the lazy term cache.
#[derive(Debug)]
pub struct ResultPage {
    slots: Vec<Upi>,
    canonical: Vec<usize>,
    arity: Arity,
    continuation: Continuation,
    terms: Option<PageTerms>,
}

fn bad_page(at: usize, message: impl Into<String>) -> Error {
    Error::Decode { input: format!("page slot {at}"), message: message.into() }
}

impl ResultPage {
    /// A page with no rows and no continuation.
    pub fn empty(arity: Arity) -> Self {
        Self {
            slots: Vec::new(),
            canonical: Vec::new(),
            arity,
            continuation: Continuation::Exhausted,
            terms: None,
        }
    }

    /// Build a page from the identifier array and optional def array of one response.
    ///
    /// An empty identifier array means the server has no cursor left.
    pub fn decode(mut identifiers: Vec<Upi>, defs: Option<Vec<String>>, arity: Arity) -> Result<Self> {
        let Some(marker) = identifiers.pop() else {
            return Ok(Self::empty(arity));
        };
        let continuation = match marker {
            Upi::Code(c) => Continuation::from_code(c),
            Upi::Stored(_) => {
                return Err(bad_page(identifiers.len(), "continuation slot carries a UPI body"));
            }
        };
        let cycle = arity.cycle();
        if identifiers.len() % cycle != 0 {
            return Err(bad_page(
                identifiers.len(),
                format!("{} slots is not a whole number of {cycle}-slot rows", identifiers.len()),
            ));
        }

        let canonical = link_back_references(&identifiers)?;
        let terms = match defs {
            Some(defs) => Some(pair_defs(&identifiers, &canonical, cycle, defs)?),
            None => None,
        };

        Ok(Self { slots: identifiers, canonical, arity, continuation, terms })
    }

    pub fn rows(&self) -> usize { self.slots.len() / self.arity.cycle() }

    pub fn is_empty(&self) -> bool { self.slots.is_empty() }

    pub fn arity(&self) -> Arity { self.arity }

    pub fn continuation(&self) -> Continuation { self.continuation }

    /// True when the page was fetched together with def-strings.
    pub fn has_terms(&self) -> bool { self.terms.is_some() }

    /// Flat slot index of `part` in `row`.
    pub fn slot_index(&self, row: usize, part: Part) -> Option<usize> {
        (row < self.rows() && self.arity.has(part)).then(|| row * self.arity.cycle() + part.offset())
    }

    /// Slot a given slot resolves to (itself unless it is a back-reference).
    pub fn canonical_slot(&self, slot: usize) -> Option<usize> { self.canonical.get(slot).copied() }

    pub fn row_id(&self, row: usize) -> Option<i64> {
        if row >= self.rows() {
            return None;
        }
        let slot = self.canonical[row * self.arity.cycle()];
        self.slots[slot].code()
    }

    pub fn upi(&self, row: usize, part: Part) -> Option<Upi> {
        let slot = self.slot_index(row, part)?;
        Some(self.slots[self.canonical[slot]])
    }

    /// Term of `part` in `row`, decoded on first request.
    ///
    /// `Ok(None)` when the row or part does not exist or the page carries no terms.
    pub fn term(&self, row: usize, part: Part) -> Result<Option<&Term>> {
        let (Some(slot), Some(terms)) = (self.slot_index(row, part), self.terms.as_ref()) else {
            return Ok(None);
        };
        let target = self.canonical[slot];
        let Some(def) = terms.def_index[target] else {
            return Ok(None);
        };
        let cell = &terms.cache[target];
        if let Some(t) = cell.get() {
            return Ok(Some(t));
        }
        let term = decode_def(&terms.defs, def)?;
        Ok(Some(cell.get_or_init(|| term)))
    }
}

/// Resolve every back-reference to the slot it names, in one hop.
fn link_back_references(slots: &[Upi]) -> Result<Vec<usize>> {
    let mut canonical = Vec::with_capacity(slots.len());
    for (i, upi) in slots.iter().enumerate() {
        let Some(delta) = upi.back_reference() else {
            canonical.push(i);
            continue;
        };
        let target = i as i64 + delta;
        if target < 0 {
            return Err(bad_page(i, format!("back-reference {delta} points before the page")));
        }
        let target = target as usize;
        if slots[target].back_reference().is_some() {
            return Err(bad_page(i, format!("back-reference {delta} lands on another back-reference")));
        }
        canonical.push(target);
    }
    Ok(canonical)
}

/// Hand out defs to canonical term slots in order, skipping padding.
fn pair_defs(slots: &[Upi], canonical: &[usize], cycle: usize, defs: Vec<String>) -> Result<PageTerms> {
    let mut def_index = vec![None; slots.len()];
    let mut next = 0;
    for i in 0..slots.len() {
        if i % cycle == 0 || canonical[i] != i {
            continue;
        }
        while next < defs.len() && is_pass(&defs[next]) {
            next += 1;
        }
        if next == defs.len() {
            return Err(bad_page(i, format!("def array exhausted after {} entries", defs.len())));
        }
        def_index[i] = Some(next);
        next += 1;
    }
    let cache = (0..slots.len()).map(|_| OnceLock::new()).collect();
    Ok(PageTerms { defs, def_index, cache })
}
