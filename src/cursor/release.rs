//! Pending releases for cursors that were dropped without `close()`.
//!
//! Dropping an open cursor cannot talk to the server, so its token is
//! parked here instead. Tokens leave the queue in batches: after the next
//! successful page fetch of any cursor sharing the queue, from a
//! background [`Sweeper`], or through an explicit [`ReleaseQueue::flush`].
//! Release failures are logged and the token is forgotten.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::{CursorToken, PageSource};

/// Tokens released per server call, and the backlog that triggers a flush.
pub const DEFAULT_RELEASE_BATCH: usize = 10;

struct PendingRelease {
    source: Arc<dyn PageSource>,
    token: CursorToken,
}

/// Queue of server tokens waiting to be released.
pub struct ReleaseQueue {
    pending: Mutex<Vec<PendingRelease>>,
    batch: usize,
}

impl Default for ReleaseQueue {
    fn default() -> Self { Self::new(DEFAULT_RELEASE_BATCH) }
}

impl ReleaseQueue {
    /// `batch` of 0 is treated as 1.
    pub fn new(batch: usize) -> Self {
        Self { pending: Mutex::new(Vec::new()), batch: batch.max(1) }
    }

    /// The process-wide queue used by cursors not given their own.
    pub fn global() -> Arc<ReleaseQueue> {
        static GLOBAL: OnceLock<Arc<ReleaseQueue>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ReleaseQueue::default())))
    }

    pub fn batch(&self) -> usize { self.batch }

    pub fn len(&self) -> usize { self.pending.lock().len() }

    pub fn is_empty(&self) -> bool { self.pending.lock().is_empty() }

    pub fn pending_tokens(&self) -> Vec<CursorToken> {
        self.pending.lock().iter().map(|p| p.token.clone()).collect()
    }

    pub fn enqueue(&self, source: Arc<dyn PageSource>, token: CursorToken) {
        debug!(%token, "queueing cursor release");
        self.pending.lock().push(PendingRelease { source, token });
    }

    /// Release queued tokens.
    ///
    /// Unforced, this releases one batch once the backlog has reached the
    /// batch size and otherwise does nothing. Forced, it drains the queue.
    /// Returns the number of tokens the server accepted.
    pub async fn flush(&self, force: bool) -> usize {
        let taken: Vec<PendingRelease> = {
            let mut pending = self.pending.lock();
            if pending.is_empty() || (!force && pending.len() < self.batch) {
                return 0;
            }
            let n = if force { pending.len() } else { self.batch };
            pending.drain(..n).collect()
        };

        let mut groups: Vec<(Arc<dyn PageSource>, Vec<CursorToken>)> = Vec::new();
        for p in taken {
            match groups.iter_mut().find(|(s, _)| Arc::ptr_eq(s, &p.source)) {
                Some((_, tokens)) => tokens.push(p.token),
                None => groups.push((p.source, vec![p.token])),
            }
        }

        let mut released = 0;
        for (source, tokens) in &groups {
            for chunk in tokens.chunks(self.batch) {
                match source.release_cursors(chunk).await {
                    Ok(()) => released += chunk.len(),
                    Err(e) => warn!(count = chunk.len(), error = %e, "failed to release queued cursors"),
                }
            }
        }
        debug!(released, forced = force, "flushed release queue");
        released
    }

    /// Drain the queue every `every` on the current tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> Sweeper {
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await;
            loop {
                tick.tick().await;
                queue.flush(true).await;
            }
        });
        Sweeper { handle }
    }
}

/// Background task draining a [`ReleaseQueue`]; stops when dropped.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn stop(self) {}
}

impl Drop for Sweeper {
    fn drop(&mut self) { self.handle.abort(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryTransport, OpenOptions};

    fn open_tokens(t: &MemoryTransport, n: usize) -> Vec<CursorToken> {
        (0..n).map(|_| t.open_cursor(Vec::new(), OpenOptions::default()).unwrap().0).collect()
    }

    #[tokio::test]
    async fn test_unforced_flush_waits_for_batch() {
        let t = MemoryTransport::new();
        let source: Arc<dyn PageSource> = Arc::new(t.clone());
        let q = ReleaseQueue::new(3);
        for token in open_tokens(&t, 2) {
            q.enqueue(Arc::clone(&source), token);
        }
        assert_eq!(q.flush(false).await, 0);
        assert_eq!(q.len(), 2);
        assert_eq!(q.flush(true).await, 2);
        assert!(q.is_empty());
        assert_eq!(t.released_tokens().len(), 2);
        assert_eq!(t.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_unforced_flush_releases_one_batch() {
        let t = MemoryTransport::new();
        let source: Arc<dyn PageSource> = Arc::new(t.clone());
        let q = ReleaseQueue::new(2);
        for token in open_tokens(&t, 5) {
            q.enqueue(Arc::clone(&source), token);
        }
        assert_eq!(q.flush(false).await, 2);
        assert_eq!(q.len(), 3);
        assert_eq!(q.flush(true).await, 3);
        // 2 + 2 + 1
        assert_eq!(t.release_calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_release_is_dropped() {
        let t = MemoryTransport::new();
        let source: Arc<dyn PageSource> = Arc::new(t.clone());
        let q = ReleaseQueue::new(4);
        q.enqueue(source, open_tokens(&t, 1).remove(0));
        t.fail_releases(Some("server gone".into()));
        assert_eq!(q.flush(true).await, 0);
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_drains_queue() {
        let t = MemoryTransport::new();
        let source: Arc<dyn PageSource> = Arc::new(t.clone());
        let q = Arc::new(ReleaseQueue::new(10));
        q.enqueue(source, open_tokens(&t, 1).remove(0));
        let sweeper = q.spawn_sweeper(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(q.is_empty());
        assert_eq!(t.released_tokens().len(), 1);
        sweeper.stop();
    }
}
