//! End-to-end tests for cursor paging.
//!
//! Most tests drive a `Cursor` against `MemoryTransport`. The few that need
//! byte-exact pages (hand-written defs, odd markers) use `ScriptedSource`,
//! which answers fetches from a queue of prepared pages.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use agraph_cursor::transport::memory::OpenOptions;
use agraph_cursor::{
    Arity, Cursor, CursorConfig, CursorPhase, CursorToken, Error, FetchMode, FetchedPage,
    MemoryTransport, PageSource, Part, ReleaseQueue, Term, TermKind, Upi,
};

// ============================================================================
// Helpers
// ============================================================================

fn people(n: usize) -> Vec<Vec<Term>> {
    (0..n)
        .map(|i| vec![
            Term::uri(format!("http://example.org/person/{i}")),
            Term::uri("http://example.org/name"),
            Term::lang(format!("Person {i}"), "en"),
            Term::DefaultGraph,
        ])
        .collect()
}

fn open(t: &MemoryTransport, rows: Vec<Vec<Term>>, options: OpenOptions, look_ahead: usize) -> Cursor {
    let mode = options.mode;
    let arity = options.arity;
    let (token, first) = t.open_cursor(rows, options).unwrap();
    let config = CursorConfig { look_ahead: Some(look_ahead), mode, arity };
    Cursor::open(Arc::new(t.clone()), Some(token), Some(first), config)
        .unwrap()
        .with_release_queue(Arc::new(ReleaseQueue::default()))
}

fn first_page(n: usize) -> OpenOptions {
    OpenOptions { first_page: n, ..Default::default() }
}

fn stored(n: u8) -> Upi {
    let mut body = [0u8; 12];
    body[11] = n;
    Upi::Stored(body)
}

fn strings(items: &[&str]) -> Vec<String> { items.iter().map(|s| s.to_string()).collect() }

/// Page source replaying prepared responses.
#[derive(Default)]
struct ScriptedSource {
    pages: Mutex<VecDeque<FetchedPage>>,
    fetches: Mutex<Vec<usize>>,
    released: Mutex<Vec<CursorToken>>,
}

impl ScriptedSource {
    fn with_pages(pages: Vec<FetchedPage>) -> Arc<Self> {
        Arc::new(Self { pages: Mutex::new(pages.into()), ..Default::default() })
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _token: &CursorToken,
        max_rows: usize,
        _mode: FetchMode,
    ) -> agraph_cursor::Result<Option<FetchedPage>> {
        self.fetches.lock().push(max_rows);
        Ok(self.pages.lock().pop_front())
    }

    async fn release_cursor(&self, token: &CursorToken) -> agraph_cursor::Result<()> {
        self.released.lock().push(token.clone());
        Ok(())
    }
}

// ============================================================================
// 1. Two rows with a "more" marker, then an exhausted page
// ============================================================================

#[tokio::test]
async fn test_more_marker_costs_exactly_one_fetch() {
    let first = FetchedPage::new(
        vec![
            Upi::Code(1), stored(1), stored(2), stored(3), stored(4),
            Upi::Code(2), stored(5), Upi::Code(-5), stored(6), Upi::Code(-5),
            Upi::Code(1),
        ],
        Some(strings(&[
            "%Nhttp://example.org/alice",
            "%Nhttp://example.org/says",
            "%G2Xenhello",
            "%XD",
            "%M0X/friend",
            "%T1X7http://www.w3.org/2001/XMLSchema#integer",
        ])),
    );
    let last = FetchedPage::new(vec![Upi::Code(0)], Some(Vec::new()));
    let source = ScriptedSource::with_pages(vec![last]);
    let cursor = Cursor::open(source.clone(), Some(CursorToken(7)), Some(first), CursorConfig::default())
        .unwrap()
        .with_release_queue(Arc::new(ReleaseQueue::default()));

    assert!(cursor.step().await.unwrap());
    assert_eq!(cursor.id(), Some(1));
    assert_eq!(cursor.term(Part::Object).unwrap(), Some(Term::lang("hello", "en")));
    assert_eq!(cursor.term(Part::Context).unwrap(), Some(Term::DefaultGraph));
    let row = cursor.current().unwrap();
    assert_eq!(row.kind(Part::Object).unwrap(), Some(TermKind::LiteralLang));
    assert_eq!(row.kind(Part::Subject).unwrap().map(TermKind::name), Some("node"));

    assert!(cursor.step().await.unwrap());
    assert_eq!(cursor.id(), Some(2));
    assert_eq!(cursor.term(Part::Subject).unwrap(), Some(Term::uri("http://example.org/alice/friend")));
    // back-references resolve to the first row's slots
    assert_eq!(cursor.predicate(), Some(stored(2)));
    assert_eq!(cursor.term(Part::Predicate).unwrap(), Some(Term::uri("http://example.org/says")));
    assert_eq!(cursor.term(Part::Object).unwrap(), Some(Term::typed("7", "http://www.w3.org/2001/XMLSchema#integer")));
    assert_eq!(cursor.context(), Some(stored(4)));
    assert!(source.fetches.lock().is_empty());

    assert!(!cursor.step().await.unwrap());
    assert_eq!(source.fetches.lock().len(), 1);
    assert!(cursor.current().is_none());
    assert_eq!(cursor.phase(), CursorPhase::Done);
    assert!(!cursor.has_next());

    cursor.close().await;
    assert_eq!(*source.released.lock(), vec![CursorToken(7)]);
}

// ============================================================================
// 2. Exhausted and truncated markers never fetch
// ============================================================================

#[tokio::test]
async fn test_exhausted_marker_never_fetches() {
    let t = MemoryTransport::new();
    let cursor = open(&t, people(2), first_page(2), 10);
    assert!(cursor.step().await.unwrap());
    assert!(cursor.step().await.unwrap());
    assert!(!cursor.has_next());
    assert!(!cursor.step().await.unwrap());
    assert_eq!(t.fetch_calls(), 0);
    assert!(!cursor.is_truncated());
    cursor.close().await;
}

#[tokio::test]
async fn test_truncated_marker_never_fetches() {
    let t = MemoryTransport::new();
    let opts = OpenOptions { first_page: 2, limit: Some(3), ..Default::default() };
    let cursor = open(&t, people(10), opts, 10);

    let mut seen = 0;
    while cursor.step().await.unwrap() {
        seen += 1;
    }
    assert_eq!(seen, 3);
    // the second page carries the negative marker
    assert_eq!(t.fetch_calls(), 1);
    assert!(cursor.is_truncated());
    assert!(!cursor.step().await.unwrap());
    assert_eq!(t.fetch_calls(), 1);
    cursor.close().await;
}

#[tokio::test]
async fn test_truncated_flag_set_with_page() {
    let source = ScriptedSource::with_pages(Vec::new());
    let first = FetchedPage::new(vec![Upi::Code(1), stored(1), stored(2), stored(3), Upi::Code(-4)], None);
    let config = CursorConfig { mode: FetchMode::Identifiers, arity: Arity::Triples, ..Default::default() };
    let cursor = Cursor::open(source.clone(), Some(CursorToken(1)), Some(first), config).unwrap();
    assert!(cursor.is_truncated());
    assert!(cursor.step().await.unwrap());
    assert!(!cursor.step().await.unwrap());
    assert!(source.fetches.lock().is_empty());
    cursor.close().await;
}

// ============================================================================
// 3. step(n)
// ============================================================================

#[tokio::test]
async fn test_step_n_matches_single_steps() {
    for batch in [1, 2, 3, 5, 7, 20] {
        let a = MemoryTransport::new();
        let b = MemoryTransport::new();
        let single = open(&a, people(11), first_page(3), 4);
        let batched = open(&b, people(11), first_page(3), 4);

        let mut expected = Vec::new();
        while single.step().await.unwrap() {
            expected.push(single.triple().unwrap().unwrap().to_string());
        }

        let mut got = Vec::new();
        loop {
            let rows = batched.step_n(batch).await.unwrap();
            if rows.is_empty() {
                break;
            }
            assert!(rows.len() <= batch);
            for row in rows {
                got.push(row.to_triple().unwrap().to_string());
            }
        }
        assert_eq!(got, expected, "batch of {batch}");
        assert_eq!(got.len(), 11);
    }
}

#[tokio::test]
async fn test_step_n_fetch_size() {
    let t = MemoryTransport::new();
    let cursor = open(&t, people(20), first_page(2), 3);

    let rows = cursor.step_n(6).await.unwrap();
    assert_eq!(rows.len(), 6);
    // 2 buffered, so max(6 - 2, 3)
    assert_eq!(t.fetch_log().last().map(|(_, n)| *n), Some(4));
    assert_eq!(cursor.id(), Some(rows[5].id()));

    cursor.step_n(1).await.unwrap();
    assert_eq!(t.fetch_log().last().map(|(_, n)| *n), Some(3));
    assert_eq!(t.fetch_calls(), 2);
}

#[tokio::test]
async fn test_step_n_returns_what_remains() {
    let t = MemoryTransport::new();
    let cursor = open(&t, people(4), first_page(1), 2);
    let rows = cursor.step_n(100).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(t.fetch_calls(), 1);
    assert!(cursor.step_n(5).await.unwrap().is_empty());
    assert!(cursor.current().is_none());
    assert_eq!(cursor.step_n(0).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_step_n_skips_marker_only_page() {
    let source = ScriptedSource::with_pages(vec![
        FetchedPage::new(vec![Upi::Code(1)], None),
        FetchedPage::new(vec![Upi::Code(5), stored(1), stored(2), stored(3), Upi::Code(0)], None),
    ]);
    let config = CursorConfig { mode: FetchMode::Identifiers, arity: Arity::Triples, ..Default::default() };
    let cursor = Cursor::open(source.clone(), Some(CursorToken(2)), None, config)
        .unwrap()
        .with_release_queue(Arc::new(ReleaseQueue::default()));

    let rows = cursor.step_n(3).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id(), 5);
    assert_eq!(source.fetches.lock().len(), 2);
    assert!(!cursor.has_next());
    cursor.close().await;
}

// ============================================================================
// 4. Close
// ============================================================================

#[tokio::test]
async fn test_close_is_idempotent() {
    let t = MemoryTransport::new();
    let cursor = open(&t, people(3), first_page(1), 10);
    cursor.step().await.unwrap();
    cursor.close().await;
    cursor.close().await;
    assert_eq!(t.release_calls(), 1);
    assert_eq!(t.open_cursors(), 0);
    assert!(!cursor.step().await.unwrap());
    assert!(cursor.step_n(3).await.unwrap().is_empty());
    assert_eq!(cursor.subject(), None);
    assert_eq!(cursor.term(Part::Object).unwrap(), None);
    assert_eq!(cursor.phase(), CursorPhase::Closed);
}

#[tokio::test]
async fn test_close_after_done() {
    let t = MemoryTransport::new();
    let cursor = open(&t, people(1), first_page(5), 10);
    while cursor.step().await.unwrap() {}
    cursor.close().await;
    cursor.close().await;
    assert_eq!(t.release_calls(), 1);
}

#[tokio::test]
async fn test_close_swallows_release_failure() {
    let t = MemoryTransport::new();
    let cursor = open(&t, people(2), first_page(1), 10);
    t.fail_releases(Some("connection reset".into()));
    cursor.close().await;
    assert!(cursor.is_closed());
    assert!(cursor.token().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_close_during_fetch_discards_page() {
    let t = MemoryTransport::new();
    let cursor = Arc::new(open(&t, people(5), first_page(1), 10));
    assert!(cursor.step().await.unwrap());

    t.set_fetch_delay(Some(Duration::from_millis(200)));
    let stepper = {
        let cursor = Arc::clone(&cursor);
        tokio::spawn(async move { cursor.step().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cursor.close().await;
    assert_eq!(t.release_calls(), 1);

    assert!(!stepper.await.unwrap().unwrap());
    assert!(cursor.current().is_none());
    assert_eq!(cursor.phase(), CursorPhase::Closed);
    assert_eq!(t.release_calls(), 1);
}

// ============================================================================
// 5. Errors
// ============================================================================

#[tokio::test]
async fn test_transport_error_reaches_caller() {
    let t = MemoryTransport::new();
    let cursor = open(&t, people(3), first_page(1), 10);
    assert!(cursor.step().await.unwrap());

    t.fail_next_fetch("socket closed");
    match cursor.step().await {
        Err(Error::Transport(msg)) => {
            assert!(msg.contains("socket closed"), "{msg}");
            assert!(msg.contains("cursor#"), "{msg}");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert!(cursor.current().is_none());

    // the failed fetch consumed nothing
    assert!(cursor.step().await.unwrap());
    assert!(cursor.step().await.unwrap());
    assert!(!cursor.step().await.unwrap());
    cursor.close().await;
}

#[tokio::test]
async fn test_malformed_page_is_decode_error() {
    let source = ScriptedSource::with_pages(vec![FetchedPage::new(
        vec![Upi::Code(1), stored(1), stored(2), Upi::Code(0)],
        None,
    )]);
    let cursor = Cursor::open(source, Some(CursorToken(3)), None, CursorConfig::default()).unwrap();
    assert!(matches!(cursor.step().await, Err(Error::Decode { .. })));
}

#[tokio::test]
async fn test_malformed_page_ends_iteration() {
    let source = ScriptedSource::with_pages(vec![
        // three slots cannot form four-slot rows
        FetchedPage::new(vec![Upi::Code(1), stored(1), stored(2), Upi::Code(1)], None),
        FetchedPage::new(vec![Upi::Code(9), stored(1), stored(2), stored(3), Upi::Code(0)], None),
    ]);
    let config = CursorConfig { mode: FetchMode::Identifiers, arity: Arity::Triples, ..Default::default() };
    let cursor = Cursor::open(source.clone(), Some(CursorToken(5)), None, config)
        .unwrap()
        .with_release_queue(Arc::new(ReleaseQueue::default()));

    assert!(matches!(cursor.step().await, Err(Error::Decode { .. })));
    assert!(!cursor.step().await.unwrap());
    assert!(cursor.step_n(4).await.unwrap().is_empty());
    assert_eq!(source.fetches.lock().len(), 1);
    assert!(!cursor.has_next());
    assert_eq!(cursor.phase(), CursorPhase::Done);

    cursor.close().await;
    assert_eq!(*source.released.lock(), vec![CursorToken(5)]);
}

#[test]
fn test_bad_first_page_queues_token() {
    let source = ScriptedSource::with_pages(Vec::new());
    let config = CursorConfig { arity: Arity::Triples, ..Default::default() };
    // back-reference pointing before the page
    let first = FetchedPage::new(vec![Upi::Code(1), Upi::Code(-3), stored(2), stored(3), Upi::Code(0)], None);
    assert!(matches!(
        Cursor::open(source, Some(CursorToken(4242)), Some(first), config),
        Err(Error::Decode { .. })
    ));
    assert!(ReleaseQueue::global().pending_tokens().contains(&CursorToken(4242)));
}

#[tokio::test]
async fn test_bad_def_fails_only_its_slot() {
    let first = FetchedPage::new(
        vec![Upi::Code(1), stored(1), stored(2), stored(3), Upi::Code(0)],
        Some(strings(&["%Nhttp://example.org/s", "%Q???", "%Lplain"])),
    );
    let source = ScriptedSource::with_pages(Vec::new());
    let config = CursorConfig { arity: Arity::Triples, ..Default::default() };
    let cursor = Cursor::open(source, Some(CursorToken(1)), Some(first), config).unwrap();
    assert!(cursor.step().await.unwrap());
    assert_eq!(cursor.term(Part::Subject).unwrap(), Some(Term::uri("http://example.org/s")));
    assert!(matches!(cursor.term(Part::Predicate), Err(Error::Decode { .. })));
    assert_eq!(cursor.term(Part::Object).unwrap(), Some(Term::literal("plain")));
    assert_eq!(cursor.term(Part::Context).unwrap(), None);
}

// ============================================================================
// 6. Modes and snapshots
// ============================================================================

#[tokio::test]
async fn test_identifiers_only() {
    let t = MemoryTransport::new();
    let opts = OpenOptions { mode: FetchMode::Identifiers, first_page: 1, ..Default::default() };
    let cursor = open(&t, people(2), opts, 10);
    assert!(cursor.step().await.unwrap());
    assert!(cursor.step().await.unwrap());
    assert_eq!(cursor.subject(), Some(t.intern(&Term::uri("http://example.org/person/1"))));
    assert_eq!(cursor.term(Part::Subject).unwrap(), None);
    let triple = cursor.triple().unwrap().unwrap();
    assert!(triple.object.term.is_none());
    cursor.close().await;
}

#[tokio::test]
async fn test_rows_outlive_their_page() {
    let t = MemoryTransport::new();
    let cursor = open(&t, people(4), first_page(2), 2);
    let early = cursor.next_row().await.unwrap().unwrap();
    while cursor.step().await.unwrap() {}
    assert_eq!(t.fetch_calls(), 1);
    assert_eq!(early.term(Part::Object).unwrap(), Some(&Term::lang("Person 0", "en")));
    assert_eq!(early.context(), Some(t.intern(&Term::DefaultGraph)));
}

#[tokio::test]
async fn test_no_first_page_fetches_on_first_step() {
    let t = MemoryTransport::new();
    let (token, _) = t.open_cursor(people(3), first_page(0)).unwrap();
    let config = CursorConfig { look_ahead: Some(2), ..Default::default() };
    let cursor = Cursor::open(Arc::new(t.clone()), Some(token), None, config).unwrap();
    assert!(cursor.has_next());
    assert!(cursor.step().await.unwrap());
    assert_eq!(t.fetch_log().first().map(|(_, n)| *n), Some(2));
    cursor.close().await;
}

#[tokio::test]
async fn test_without_token_serves_first_page_only() {
    let source = ScriptedSource::with_pages(Vec::new());
    let first = FetchedPage::new(vec![Upi::Code(1), stored(1), stored(2), stored(3), Upi::Code(1)], None);
    let config = CursorConfig { mode: FetchMode::Identifiers, arity: Arity::Triples, ..Default::default() };
    let cursor = Cursor::open(source.clone(), None, Some(first), config).unwrap();
    assert!(cursor.step().await.unwrap());
    assert!(!cursor.step().await.unwrap());
    assert!(source.fetches.lock().is_empty());
    cursor.close().await;
    assert!(source.released.lock().is_empty());
}

#[test]
fn test_config_from_json() {
    let config: CursorConfig =
        serde_json::from_str(r#"{"look_ahead":250,"mode":"Identifiers","arity":"Triples"}"#).unwrap();
    assert_eq!(config.look_ahead, Some(250));
    assert_eq!(config.mode, FetchMode::Identifiers);
    assert_eq!(config.arity, Arity::Triples);

    let config: CursorConfig =
        serde_json::from_str(r#"{"look_ahead":null,"mode":"IdentifiersAndTerms","arity":"Quads"}"#).unwrap();
    assert_eq!(config, CursorConfig::default());
}
