//! # Page Source Trait
//!
//! The contract between a cursor and whatever talks to the server.
//! A cursor only ever needs two things from the other side: the next
//! batch of rows for its server-side token, and a way to give the token
//! back.
//!
//! ## Implementations
//!
//! | Source | Module | Description |
//! |--------|--------|-------------|
//! | `MemoryTransport` | `memory` | In-process reference server for tests/embedding |

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use bytes::Buf;
use serde::{Deserialize, Serialize};

use crate::codec::wire;
use crate::model::Upi;
use crate::Result;

pub use memory::MemoryTransport;

// ============================================================================
// Cursor token
// ============================================================================

/// Opaque server-side cursor handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorToken(pub u64);

impl fmt::Display for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cursor#{}", self.0)
    }
}

// ============================================================================
// Fetch mode
// ============================================================================

/// What a page fetch asks the server to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FetchMode {
    /// Identifiers only; terms are never decoded.
    Identifiers,
    /// Identifiers plus one def-string per distinct slot.
    #[default]
    IdentifiersAndTerms,
}

impl FetchMode {
    pub fn with_terms(self) -> bool { matches!(self, FetchMode::IdentifiersAndTerms) }
}

// ============================================================================
// Fetched page payload
// ============================================================================

/// Raw arrays of one fetch response, before page decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    pub identifiers: Vec<Upi>,
    pub defs: Option<Vec<String>>,
}

impl FetchedPage {
    pub fn new(identifiers: Vec<Upi>, defs: Option<Vec<String>>) -> Self {
        Self { identifiers, defs }
    }

    /// Decode the identifier array from its binary wire form.
    pub fn from_wire<B: Buf>(buf: &mut B, defs: Option<Vec<String>>) -> Result<Self> {
        Ok(Self { identifiers: wire::decode_upis(buf)?, defs })
    }

    /// True when the server reported that no cursor remains.
    pub fn is_empty(&self) -> bool { self.identifiers.is_empty() }
}

// ============================================================================
// PageSource trait
// ============================================================================

/// Transport collaborator consumed by `Cursor`.
///
/// Failures are reported as `Error::Transport`; the cursor adds the token
/// to the message and otherwise passes them through untouched.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    /// Fetch up to `max_rows` further rows for `token`.
    ///
    /// `Ok(None)` (or an empty page) means the server holds no such cursor.
    async fn fetch_page(
        &self,
        token: &CursorToken,
        max_rows: usize,
        mode: FetchMode,
    ) -> Result<Option<FetchedPage>>;

    /// Release the server-side resources behind `token`.
    async fn release_cursor(&self, token: &CursorToken) -> Result<()>;

    /// Release several tokens in one call.
    ///
    /// Default: one `release_cursor` per token, stopping at the first failure.
    async fn release_cursors(&self, tokens: &[CursorToken]) -> Result<()> {
        for token in tokens {
            self.release_cursor(token).await?;
        }
        Ok(())
    }
}
