//! # Result Model
//!
//! Pure data shared by the codecs, the page buffer and the cursor:
//! identifiers, resolved terms and row snapshots. No I/O, no state.

pub mod upi;
pub mod term;
pub mod triple;

pub use upi::{Upi, UpiBuilder, UPI_WIDTH, CODE_WILD, CODE_NULL_CONTEXT, CODE_UNASSIGNED};
pub use term::{Term, TermKind, EncodedValue, DEFAULT_GRAPH_LABEL};
pub use triple::{Part, Triple, TriplePart};
