//! In-memory page source.
//!
//! This is the reference implementation of `PageSource`. It plays the
//! server's part for rows handed to it up front: interns every term to a
//! stable UPI, lays rows out in page cycles, replaces repeated identifiers
//! inside a page with back-references, writes def-strings (sharing URI
//! prefixes through `%M`), and honours a per-cursor row limit by
//! discarding the excess and reporting a negative continuation marker.
//!
//! ## Test hooks
//!
//! - call counters and a log of requested page sizes
//! - one-shot fetch failure, sticky release failure
//! - an artificial fetch delay, to hold a fetch in flight
//!
//! Use this source for:
//! - Testing cursor paging, truncation and release behaviour
//! - Embedding pre-computed result sets behind the cursor API

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::codec::DefEncoder;
use crate::cursor::default_look_ahead;
use crate::model::{Term, Upi, UPI_WIDTH};
use crate::page::{Arity, Continuation};
use crate::{Error, Result};
use super::{CursorToken, FetchMode, FetchedPage, PageSource};

// ============================================================================
// Options
// ============================================================================

/// How the memory server should serve a result set.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub arity: Arity,
    pub mode: FetchMode,
    /// Rows delivered with the open call itself.
    pub first_page: usize,
    /// Server-side limit; rows beyond it are discarded.
    pub limit: Option<usize>,
    /// Emit `%M` defs for URIs extending an earlier URI of the same page.
    pub share_prefixes: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            arity: Arity::Quads,
            mode: FetchMode::IdentifiersAndTerms,
            first_page: default_look_ahead(),
            limit: None,
            share_prefixes: true,
        }
    }
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// In-memory result server.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

struct ServerRow {
    id: i64,
    parts: SmallVec<[Term; 4]>,
}

struct ServerCursor {
    rows: VecDeque<ServerRow>,
    arity: Arity,
    /// Rows still deliverable under the limit.
    allowance: Option<usize>,
    share_prefixes: bool,
}

struct MemoryInner {
    cursors: RwLock<HashMap<CursorToken, ServerCursor>>,
    dictionary: RwLock<HashMap<Term, Upi>>,
    next_upi: AtomicU64,
    next_token: AtomicU64,
    next_row_id: AtomicU64,
    fetch_calls: AtomicUsize,
    release_calls: AtomicUsize,
    fetch_log: Mutex<Vec<(CursorToken, usize)>>,
    released: Mutex<Vec<CursorToken>>,
    fail_next_fetch: Mutex<Option<String>>,
    fail_releases: Mutex<Option<String>>,
    fetch_delay: Mutex<Option<Duration>>,
}

impl Default for MemoryTransport {
    fn default() -> Self { Self::new() }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                cursors: RwLock::new(HashMap::new()),
                dictionary: RwLock::new(HashMap::new()),
                next_upi: AtomicU64::new(1),
                next_token: AtomicU64::new(1),
                next_row_id: AtomicU64::new(1),
                fetch_calls: AtomicUsize::new(0),
                release_calls: AtomicUsize::new(0),
                fetch_log: Mutex::new(Vec::new()),
                released: Mutex::new(Vec::new()),
                fail_next_fetch: Mutex::new(None),
                fail_releases: Mutex::new(None),
                fetch_delay: Mutex::new(None),
            }),
        }
    }

    /// Stable UPI for `term`, allocated on first sight.
    pub fn intern(&self, term: &Term) -> Upi {
        if let Some(u) = self.inner.dictionary.read().get(term) {
            return *u;
        }
        let mut dict = self.inner.dictionary.write();
        *dict.entry(term.clone()).or_insert_with(|| {
            let n = self.inner.next_upi.fetch_add(1, Ordering::Relaxed);
            let mut body = [0u8; UPI_WIDTH];
            body[0] = term.kind().code();
            body[UPI_WIDTH - 8..].copy_from_slice(&n.to_be_bytes());
            Upi::Stored(body)
        })
    }

    /// Register a result set and return its token with the first page.
    ///
    /// Each row lists its terms in subject, predicate, object(, context) order.
    pub fn open_cursor(
        &self,
        rows: impl IntoIterator<Item = Vec<Term>>,
        options: OpenOptions,
    ) -> Result<(CursorToken, FetchedPage)> {
        let parts = options.arity.parts();
        let mut queued = VecDeque::new();
        for row in rows {
            if row.len() != parts {
                return Err(Error::Transport(format!(
                    "row has {} terms, expected {parts}", row.len()
                )));
            }
            let id = self.inner.next_row_id.fetch_add(1, Ordering::Relaxed) as i64;
            queued.push_back(ServerRow { id, parts: row.into_iter().collect() });
        }

        let token = CursorToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        let mut cursor = ServerCursor {
            rows: queued,
            arity: options.arity,
            allowance: options.limit,
            share_prefixes: options.share_prefixes,
        };
        let first = self.take_page(&mut cursor, options.first_page, options.mode)?;
        self.inner.cursors.write().insert(token.clone(), cursor);
        Ok((token, first))
    }

    fn take_page(&self, cursor: &mut ServerCursor, max_rows: usize, mode: FetchMode) -> Result<FetchedPage> {
        let mut n = max_rows.min(cursor.rows.len());
        if let Some(allowance) = cursor.allowance {
            n = n.min(allowance);
            cursor.allowance = Some(allowance - n);
        }

        let cycle = cursor.arity.cycle();
        let mut identifiers = Vec::with_capacity(n * cycle + 1);
        let mut encoder = if cursor.share_prefixes {
            DefEncoder::with_prefix_sharing()
        } else {
            DefEncoder::new()
        };
        let mut seen: HashMap<Upi, usize> = HashMap::new();

        for row in cursor.rows.drain(..n) {
            identifiers.push(Upi::Code(row.id));
            for term in &row.parts {
                let upi = self.intern(term);
                let slot = identifiers.len();
                match seen.get(&upi) {
                    Some(&first) if mode.with_terms() => {
                        identifiers.push(Upi::Code(first as i64 - slot as i64));
                    }
                    _ => {
                        seen.entry(upi).or_insert(slot);
                        identifiers.push(upi);
                        if mode.with_terms() {
                            encoder.push(term)?;
                        }
                    }
                }
            }
        }

        let continuation = if cursor.rows.is_empty() {
            Continuation::Exhausted
        } else if cursor.allowance == Some(0) {
            let discarded = cursor.rows.len() as u64;
            cursor.rows.clear();
            Continuation::Truncated { discarded }
        } else {
            Continuation::More
        };
        identifiers.push(Upi::Code(continuation.code()));

        let defs = mode.with_terms().then(|| encoder.finish());
        Ok(FetchedPage { identifiers, defs })
    }

    // ========================================================================
    // Test hooks
    // ========================================================================

    pub fn fetch_calls(&self) -> usize { self.inner.fetch_calls.load(Ordering::SeqCst) }

    /// Number of `release_cursor`/`release_cursors` invocations.
    pub fn release_calls(&self) -> usize { self.inner.release_calls.load(Ordering::SeqCst) }

    /// (token, max_rows) of every fetch, in order.
    pub fn fetch_log(&self) -> Vec<(CursorToken, usize)> { self.inner.fetch_log.lock().clone() }

    pub fn released_tokens(&self) -> Vec<CursorToken> { self.inner.released.lock().clone() }

    pub fn open_cursors(&self) -> usize { self.inner.cursors.read().len() }

    /// Make the next fetch fail with `Error::Transport(message)`.
    pub fn fail_next_fetch(&self, message: impl Into<String>) {
        *self.inner.fail_next_fetch.lock() = Some(message.into());
    }

    /// Make every release fail until cleared with `None`.
    pub fn fail_releases(&self, message: Option<String>) {
        *self.inner.fail_releases.lock() = message;
    }

    /// Delay every fetch by `delay` before answering.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.inner.fetch_delay.lock() = delay;
    }

    fn release_one(&self, token: &CursorToken) -> Result<()> {
        if let Some(message) = self.inner.fail_releases.lock().clone() {
            return Err(Error::Release(message));
        }
        self.inner.cursors.write().remove(token);
        self.inner.released.lock().push(token.clone());
        Ok(())
    }
}

// ============================================================================
// PageSource impl
// ============================================================================

#[async_trait]
impl PageSource for MemoryTransport {
    async fn fetch_page(
        &self,
        token: &CursorToken,
        max_rows: usize,
        mode: FetchMode,
    ) -> Result<Option<FetchedPage>> {
        self.inner.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_log.lock().push((token.clone(), max_rows));

        let delay = *self.inner.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.inner.fail_next_fetch.lock().take() {
            return Err(Error::Transport(message));
        }

        let mut cursors = self.inner.cursors.write();
        let Some(cursor) = cursors.get_mut(token) else {
            return Ok(None);
        };
        self.take_page(cursor, max_rows.max(1), mode).map(Some)
    }

    async fn release_cursor(&self, token: &CursorToken) -> Result<()> {
        self.inner.release_calls.fetch_add(1, Ordering::SeqCst);
        self.release_one(token)
    }

    async fn release_cursors(&self, tokens: &[CursorToken]) -> Result<()> {
        self.inner.release_calls.fetch_add(1, Ordering::SeqCst);
        for token in tokens {
            self.release_one(token)?;
        }
        Ok(())
    }
}
