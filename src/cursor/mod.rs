//! # Result Cursor
//!
//! A pull iterator over the rows of one remote query result.
//!
//! ```text
//!  Fresh ──step──▶ AtRow ──page used up──▶ PageExhausted
//!                    ▲                         │ fetch (one round trip)
//!                    └─────────────────────────┘
//!  AtRow ──marker 0 / <0──▶ Done          any ──close──▶ Closed
//! ```
//!
//! All cursor state sits behind one mutex that is never held across a
//! network call. A second, async gate serialises steppers, so `close()`
//! never waits for an in-flight fetch: it marks the cursor closed, gives
//! the token back, and whatever the fetch returns afterwards is dropped.
//!
//! Dropping a cursor that was never closed parks its token in a
//! [`ReleaseQueue`] instead of releasing it inline.

pub mod release;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::model::{Part, Term, TermKind, Triple, TriplePart, Upi};
use crate::page::{Arity, ResultPage};
use crate::transport::{CursorToken, FetchMode, FetchedPage, PageSource};
use crate::{Error, Result};

pub use release::{ReleaseQueue, Sweeper, DEFAULT_RELEASE_BATCH};

// ============================================================================
// Look-ahead
// ============================================================================

/// Built-in rows-per-fetch.
pub const BUILTIN_LOOK_AHEAD: usize = 1000;

static DEFAULT_LOOK_AHEAD: AtomicUsize = AtomicUsize::new(BUILTIN_LOOK_AHEAD);

/// Process-wide rows-per-fetch for cursors without their own setting.
pub fn default_look_ahead() -> usize { DEFAULT_LOOK_AHEAD.load(Ordering::Relaxed) }

/// Set the process-wide look-ahead; values below 1 restore the built-in 1000.
pub fn set_default_look_ahead(rows: usize) {
    let rows = if rows < 1 { BUILTIN_LOOK_AHEAD } else { rows };
    DEFAULT_LOOK_AHEAD.store(rows, Ordering::Relaxed);
}

// ============================================================================
// Configuration
// ============================================================================

/// Per-cursor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Rows per fetch; `None` follows the process-wide default.
    pub look_ahead: Option<usize>,
    pub mode: FetchMode,
    pub arity: Arity,
}

/// Where a cursor is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
    /// Not stepped yet.
    Fresh,
    /// Positioned on a row.
    AtRow,
    /// Between pages; the next step fetches.
    PageExhausted,
    /// No rows left.
    Done,
    Closed,
}

// ============================================================================
// Row
// ============================================================================

/// Row id reported when the id slot holds no code.
pub const NO_ROW_ID: i64 = -1;

/// Handle on one row of a page. Terms are decoded when first asked for.
#[derive(Debug, Clone)]
pub struct Row {
    page: Arc<ResultPage>,
    index: usize,
}

impl Row {
    pub fn id(&self) -> i64 { self.page.row_id(self.index).unwrap_or(NO_ROW_ID) }

    /// Position of the row within its page.
    pub fn index(&self) -> usize { self.index }

    pub fn upi(&self, part: Part) -> Option<Upi> { self.page.upi(self.index, part) }

    pub fn subject(&self) -> Option<Upi> { self.upi(Part::Subject) }

    pub fn predicate(&self) -> Option<Upi> { self.upi(Part::Predicate) }

    pub fn object(&self) -> Option<Upi> { self.upi(Part::Object) }

    pub fn context(&self) -> Option<Upi> { self.upi(Part::Context) }

    /// Decoded term of `part`; `Ok(None)` for identifier-only pages.
    pub fn term(&self, part: Part) -> Result<Option<&Term>> { self.page.term(self.index, part) }

    pub fn kind(&self, part: Part) -> Result<Option<TermKind>> {
        Ok(self.term(part)?.map(Term::kind))
    }

    /// Resolve every slot of the row.
    pub fn to_triple(&self) -> Result<Triple> {
        let part = |p: Part| -> Result<TriplePart> {
            let upi = self.upi(p).unwrap_or(Upi::wild());
            Ok(TriplePart::new(upi, self.term(p)?.cloned()))
        };
        Ok(Triple {
            id: self.id(),
            subject: part(Part::Subject)?,
            predicate: part(Part::Predicate)?,
            object: part(Part::Object)?,
            context: match self.page.arity() {
                Arity::Quads => Some(part(Part::Context)?),
                Arity::Triples => None,
            },
        })
    }

    fn label(&self, part: Part) -> String {
        match self.term(part) {
            Ok(Some(t)) => t.to_string(),
            _ => self.upi(part).map(|u| u.to_string()).unwrap_or_default(),
        }
    }
}

// ============================================================================
// Cursor state
// ============================================================================

struct CursorState {
    token: Option<CursorToken>,
    page: Option<Arc<ResultPage>>,
    next_row: usize,
    current: Option<Row>,
    has_more: bool,
    truncated: bool,
    started: bool,
    closed: bool,
    look_ahead: Option<usize>,
}

impl CursorState {
    fn remaining(&self) -> usize {
        self.page.as_ref().map_or(0, |p| p.rows() - self.next_row)
    }

    fn look_ahead(&self) -> usize { self.look_ahead.unwrap_or_else(default_look_ahead) }

    fn install(&mut self, page: ResultPage) {
        let continuation = page.continuation();
        self.has_more = continuation.has_more() && self.token.is_some();
        self.truncated |= continuation.is_truncated();
        self.next_row = 0;
        self.page = Some(Arc::new(page));
    }

    /// Move onto the next buffered row, if any.
    fn advance(&mut self) -> Option<Row> {
        if self.remaining() == 0 {
            return None;
        }
        let page = self.page.as_ref().map(Arc::clone)?;
        let row = Row { page, index: self.next_row };
        self.next_row += 1;
        self.started = true;
        self.current = Some(row.clone());
        Some(row)
    }

    fn phase(&self) -> CursorPhase {
        if self.closed {
            CursorPhase::Closed
        } else if !self.started {
            CursorPhase::Fresh
        } else if self.current.is_some() {
            CursorPhase::AtRow
        } else if self.has_more || self.remaining() > 0 {
            CursorPhase::PageExhausted
        } else {
            CursorPhase::Done
        }
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Client side of a server cursor.
pub struct Cursor {
    source: Arc<dyn PageSource>,
    release: Arc<ReleaseQueue>,
    mode: FetchMode,
    arity: Arity,
    state: Mutex<CursorState>,
    stepping: tokio::sync::Mutex<()>,
}

impl Cursor {
    /// Wrap a freshly executed query.
    ///
    /// `first` is the page that came back with the query, if any. Without
    /// it, the first `step` fetches. Without a `token`, only `first` is
    /// ever served.
    pub fn open(
        source: Arc<dyn PageSource>,
        token: Option<CursorToken>,
        first: Option<FetchedPage>,
        config: CursorConfig,
    ) -> Result<Self> {
        let mut state = CursorState {
            has_more: token.is_some(),
            token,
            page: None,
            next_row: 0,
            current: None,
            truncated: false,
            started: false,
            closed: false,
            look_ahead: config.look_ahead.filter(|n| *n >= 1),
        };
        if let Some(first) = first {
            match decode_page(first, config.mode, config.arity) {
                Ok(Some(page)) => state.install(page),
                Ok(None) => state.has_more = false,
                Err(e) => {
                    if let Some(token) = state.token.take() {
                        ReleaseQueue::global().enqueue(source, token);
                    }
                    return Err(e);
                }
            }
        }
        debug!(token = ?state.token, rows = state.remaining(), more = state.has_more, "cursor opened");
        Ok(Self {
            source,
            release: ReleaseQueue::global(),
            mode: config.mode,
            arity: config.arity,
            state: Mutex::new(state),
            stepping: tokio::sync::Mutex::new(()),
        })
    }

    /// Park tokens of this cursor in `queue` rather than the global one.
    pub fn with_release_queue(mut self, queue: Arc<ReleaseQueue>) -> Self {
        self.release = queue;
        self
    }

    pub fn mode(&self) -> FetchMode { self.mode }

    pub fn arity(&self) -> Arity { self.arity }

    pub fn token(&self) -> Option<CursorToken> { self.state.lock().token.clone() }

    pub fn look_ahead(&self) -> usize { self.state.lock().look_ahead() }

    /// Rows per fetch for this cursor; values below 1 follow the process default.
    pub fn set_look_ahead(&self, rows: usize) {
        self.state.lock().look_ahead = (rows >= 1).then_some(rows);
    }

    pub fn phase(&self) -> CursorPhase { self.state.lock().phase() }

    /// True while rows are buffered or the server has more.
    pub fn has_next(&self) -> bool {
        let st = self.state.lock();
        !st.closed && (st.remaining() > 0 || st.has_more)
    }

    /// True once the server reported dropping rows at its limit.
    pub fn is_truncated(&self) -> bool { self.state.lock().truncated }

    pub fn is_closed(&self) -> bool { self.state.lock().closed }

    // ========================================================================
    // Stepping
    // ========================================================================

    /// Advance one row, fetching the next page when this one is used up.
    ///
    /// Returns `false` once the result is exhausted or the cursor is closed.
    pub async fn step(&self) -> Result<bool> {
        let _turn = self.stepping.lock().await;
        loop {
            let (token, rows) = {
                let mut st = self.state.lock();
                if st.closed {
                    return Ok(false);
                }
                if let Some(row) = st.advance() {
                    trace!(id = row.id(), "stepped");
                    return Ok(true);
                }
                st.current = None;
                st.started = true;
                let Some(token) = st.token.clone().filter(|_| st.has_more) else {
                    st.has_more = false;
                    return Ok(false);
                };
                (token, st.look_ahead())
            };
            let page = self.fetch(&token, rows).await?;
            if !self.adopt(page) {
                return Ok(false);
            }
            self.release.flush(false).await;
        }
    }

    /// Advance up to `n` rows, returning the rows passed over.
    ///
    /// Buffered rows are used first; if they fall short and the server has
    /// more, one fetch of `max(n - buffered, look_ahead)` rows tops up.
    /// Pages holding only a "more" marker are skipped over.
    pub async fn step_n(&self, n: usize) -> Result<Vec<Row>> {
        let _turn = self.stepping.lock().await;
        if n == 0 {
            return Ok(Vec::new());
        }
        let (have, fetch) = {
            let st = self.state.lock();
            if st.closed {
                return Ok(Vec::new());
            }
            let have = st.remaining().min(n);
            let fetch = match &st.token {
                Some(token) if have < n && st.has_more => {
                    Some((token.clone(), (n - have).max(st.look_ahead())))
                }
                _ => None,
            };
            (have, fetch)
        };

        let fetched = match fetch {
            Some((token, rows)) => Some(self.fetch_rows(&token, rows).await?),
            None => None,
        };

        let fetched_ok = fetched.is_some();
        let mut out = Vec::with_capacity(n);
        {
            let mut st = self.state.lock();
            if st.closed {
                return Ok(Vec::new());
            }
            st.started = true;
            out.extend((0..have).filter_map(|_| st.advance()));
            match fetched {
                Some(Some(page)) => {
                    st.install(page);
                    while out.len() < n {
                        match st.advance() {
                            Some(row) => out.push(row),
                            None => break,
                        }
                    }
                }
                Some(None) => st.has_more = false,
                None => {}
            }
            if out.is_empty() {
                st.current = None;
            }
        }
        if fetched_ok {
            self.release.flush(false).await;
        }
        trace!(requested = n, returned = out.len(), "stepped batch");
        Ok(out)
    }

    /// Step and return the new current row.
    pub async fn next_row(&self) -> Result<Option<Row>> {
        if self.step().await? {
            Ok(self.current())
        } else {
            Ok(None)
        }
    }

    async fn fetch(&self, token: &CursorToken, rows: usize) -> Result<Option<ResultPage>> {
        debug!(%token, rows, "fetching page");
        let fetched = self
            .source
            .fetch_page(token, rows, self.mode)
            .await
            .map_err(|e| match e {
                Error::Transport(msg) => Error::Transport(format!("{token}: {msg}")),
                other => other,
            })?;
        let page = match fetched {
            Some(page) => match decode_page(page, self.mode, self.arity) {
                Ok(page) => page,
                Err(e) => {
                    // an undecodable page ends iteration; the token stays for release
                    warn!(%token, error = %e, "dropping undecodable page");
                    self.state.lock().has_more = false;
                    return Err(e);
                }
            },
            None => None,
        };
        debug!(%token, received = page.as_ref().map_or(0, |p| p.rows()), "page fetched");
        Ok(page)
    }

    /// Fetch until a page carries rows or the server has nothing more.
    async fn fetch_rows(&self, token: &CursorToken, rows: usize) -> Result<Option<ResultPage>> {
        loop {
            let page = self.fetch(token, rows).await?;
            match &page {
                Some(p) if p.is_empty() && p.continuation().has_more() && !self.is_closed() => {
                    trace!(%token, "skipping marker-only page");
                }
                _ => return Ok(page),
            }
        }
    }

    /// Install a fetched page unless the cursor was closed meanwhile.
    fn adopt(&self, page: Option<ResultPage>) -> bool {
        let mut st = self.state.lock();
        if st.closed {
            debug!("discarding page fetched after close");
            return false;
        }
        match page {
            Some(page) => {
                st.install(page);
                true
            }
            None => {
                st.has_more = false;
                false
            }
        }
    }

    // ========================================================================
    // Current row
    // ========================================================================

    /// The row the cursor is positioned on.
    pub fn current(&self) -> Option<Row> { self.state.lock().current.clone() }

    pub fn id(&self) -> Option<i64> { self.current().map(|r| r.id()) }

    pub fn upi(&self, part: Part) -> Option<Upi> { self.current().and_then(|r| r.upi(part)) }

    pub fn subject(&self) -> Option<Upi> { self.upi(Part::Subject) }

    pub fn predicate(&self) -> Option<Upi> { self.upi(Part::Predicate) }

    pub fn object(&self) -> Option<Upi> { self.upi(Part::Object) }

    pub fn context(&self) -> Option<Upi> { self.upi(Part::Context) }

    /// Decoded term of `part` in the current row.
    pub fn term(&self, part: Part) -> Result<Option<Term>> {
        match self.current() {
            Some(row) => Ok(row.term(part)?.cloned()),
            None => Ok(None),
        }
    }

    pub fn triple(&self) -> Result<Option<Triple>> {
        self.current().map(|r| r.to_triple()).transpose()
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Give the server cursor back. Safe to call any number of times.
    pub async fn close(&self) {
        let token = {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.closed = true;
            st.has_more = false;
            st.current = None;
            st.page = None;
            st.token.take()
        };
        let Some(token) = token else {
            return;
        };
        match self.source.release_cursor(&token).await {
            Ok(()) => debug!(%token, "cursor released"),
            Err(e) => warn!(%token, error = %e, "failed to release cursor"),
        }
    }
}

fn decode_page(page: FetchedPage, mode: FetchMode, arity: Arity) -> Result<Option<ResultPage>> {
    if page.is_empty() {
        return Ok(None);
    }
    let defs = if mode.with_terms() { page.defs } else { None };
    ResultPage::decode(page.identifiers, defs, arity).map(Some)
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Some(token) = self.state.get_mut().token.take() {
            debug!(%token, "cursor dropped while open");
            self.release.enqueue(Arc::clone(&self.source), token);
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (row, more) = {
            let st = self.state.lock();
            (st.current.clone(), !st.closed && (st.remaining() > 0 || st.has_more))
        };
        write!(f, "<Cursor ")?;
        match row {
            Some(row) => {
                write!(f, "{}:", row.id())?;
                for part in Part::ALL {
                    if self.arity.has(part) {
                        write!(f, " {}", row.label(part))?;
                    }
                }
            }
            None => write!(f, "empty")?,
        }
        write!(f, ", {} next>", if more { "with" } else { "no" })
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Cursor")
            .field("token", &st.token)
            .field("phase", &st.phase())
            .field("buffered", &st.remaining())
            .field("truncated", &st.truncated)
            .finish()
    }
}
