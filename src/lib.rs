//! # agraph-cursor: Client Cursor for Remote Triple-Store Results
//!
//! Pulls query results from a remote triple store one page at a time and
//! exposes them as a stepping cursor over rows of identifiers and terms.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `PageSource` is the contract between cursor and transport
//! 2. **Lazy terms**: def-strings are decoded only when a slot is read, then cached
//! 3. **Pages are immutable**: rows handed out share their page, never copy it
//! 4. **Close is cheap**: releasing a cursor never waits on an in-flight fetch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agraph_cursor::{Cursor, CursorConfig, MemoryTransport, Part, Term};
//! use agraph_cursor::transport::memory::OpenOptions;
//!
//! # async fn example() -> agraph_cursor::Result<()> {
//! let server = MemoryTransport::new();
//! let rows = vec![vec![
//!     Term::uri("http://example.org/ada"),
//!     Term::uri("http://example.org/name"),
//!     Term::lang("Ada", "en"),
//!     Term::DefaultGraph,
//! ]];
//! let (token, first) = server.open_cursor(rows, OpenOptions::default())?;
//!
//! let cursor = Cursor::open(Arc::new(server), Some(token), Some(first), CursorConfig::default())?;
//! while cursor.step().await? {
//!     println!("{:?}", cursor.term(Part::Object)?);
//! }
//! cursor.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Page Sources
//!
//! | Source | Feature | Description |
//! |--------|---------|-------------|
//! | Memory | (default) | In-process result server for testing/embedding |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod codec;
pub mod page;
pub mod transport;
pub mod cursor;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    Upi, UpiBuilder, Term, TermKind, EncodedValue,
    Part, Triple, TriplePart,
};

// ============================================================================
// Re-exports: Pages and transport
// ============================================================================

pub use page::{Arity, Continuation, ResultPage};
pub use transport::{CursorToken, FetchMode, FetchedPage, PageSource, MemoryTransport};

// ============================================================================
// Re-exports: Cursor
// ============================================================================

pub use cursor::{
    Cursor, CursorConfig, CursorPhase, Row,
    ReleaseQueue, Sweeper,
    default_look_ahead, set_default_look_ahead,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Decode error in {input:?}: {message}")]
    Decode { input: String, message: String },

    #[error("Wire error at byte {offset}: {message}")]
    Wire { offset: usize, message: String },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Release error: {0}")]
    Release(String),
}

pub type Result<T> = std::result::Result<T, Error>;
