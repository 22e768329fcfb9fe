//! Triple snapshot taken from a cursor row.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Term, Upi};

/// Position of a term within a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Part {
    Subject,
    Predicate,
    Object,
    Context,
}

impl Part {
    pub const ALL: [Part; 4] = [Part::Subject, Part::Predicate, Part::Object, Part::Context];

    /// Offset of the part inside a page cycle; the row id sits at offset 0.
    pub fn offset(self) -> usize {
        match self {
            Part::Subject => 1,
            Part::Predicate => 2,
            Part::Object => 3,
            Part::Context => 4,
        }
    }
}

/// One resolved slot: identifier plus term, when terms were fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplePart {
    pub upi: Upi,
    pub term: Option<Term>,
}

impl TriplePart {
    pub fn new(upi: Upi, term: Option<Term>) -> Self { Self { upi, term } }
}

impl fmt::Display for TriplePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.term {
            Some(t) => write!(f, "{t}"),
            None => write!(f, "{}", self.upi),
        }
    }
}

/// A fully materialized row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    pub id: i64,
    pub subject: TriplePart,
    pub predicate: TriplePart,
    pub object: TriplePart,
    /// Absent for three-part pages.
    pub context: Option<TriplePart>,
}

impl Triple {
    pub fn part(&self, part: Part) -> Option<&TriplePart> {
        match part {
            Part::Subject => Some(&self.subject),
            Part::Predicate => Some(&self.predicate),
            Part::Object => Some(&self.object),
            Part::Context => self.context.as_ref(),
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {} {}", self.id, self.subject, self.predicate, self.object)?;
        if let Some(c) = &self.context {
            write!(f, " {c}")?;
        }
        Ok(())
    }
}
