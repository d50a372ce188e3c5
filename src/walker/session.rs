//! Per-call session state
//!
//! Everything mutable that one listing call shares between its workers:
//! the dedup set, the running counters, the accepting/halted flags and the
//! overflow log. A session is created at call entry and dropped when the
//! call returns; nothing in it outlives one request.

use crate::entry::Normalizer;
use crate::error::SinkError;
use crate::filter::{Pattern, SeenSet};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Limits that truncate a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum recursion level a directory task may have, exclusive
    pub max_depth: usize,

    /// Maximum number of emitted lines
    pub max_entries: usize,

    /// Maximum number of directory tasks, root included
    pub max_directories: usize,
}

/// Which limit was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowKind {
    /// A subdirectory was deeper than the depth limit
    Depth,
    /// The total entry limit was reached
    Entries,
    /// The directory limit was reached
    Directories,
}

impl fmt::Display for OverflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowKind::Depth => write!(f, "depth"),
            OverflowKind::Entries => write!(f, "count"),
            OverflowKind::Directories => write!(f, "directories"),
        }
    }
}

/// Overflow events recorded during one call
#[derive(Debug, Default)]
struct OverflowLog {
    depth: AtomicU64,
    entries: AtomicU64,
    directories: AtomicU64,
}

impl OverflowLog {
    fn counter(&self, kind: OverflowKind) -> &AtomicU64 {
        match kind {
            OverflowKind::Depth => &self.depth,
            OverflowKind::Entries => &self.entries,
            OverflowKind::Directories => &self.directories,
        }
    }

    /// Count one event; returns true for the first event of this kind
    fn record(&self, kind: OverflowKind) -> bool {
        self.counter(kind).fetch_add(1, Ordering::Relaxed) == 0
    }

    fn summary(&self) -> OverflowSummary {
        OverflowSummary {
            depth: self.depth.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            directories: self.directories.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the overflow events of one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverflowSummary {
    /// Subdirectories dropped for being too deep
    pub depth: u64,
    /// Lines discarded after the entry limit was reached
    pub entries: u64,
    /// Subdirectories dropped after the directory limit was reached
    pub directories: u64,
}

impl OverflowSummary {
    /// Check if any limit truncated the listing
    pub fn truncated(&self) -> bool {
        self.depth > 0 || self.entries > 0 || self.directories > 0
    }

    /// Number of events of one kind
    pub fn count(&self, kind: OverflowKind) -> u64 {
        match kind {
            OverflowKind::Depth => self.depth,
            OverflowKind::Entries => self.entries,
            OverflowKind::Directories => self.directories,
        }
    }
}

/// Shared state of one listing call
pub struct Session {
    normalizer: Normalizer,
    pattern: Pattern,
    limits: Limits,
    seen: SeenSet,

    emitted: AtomicUsize,
    directories: AtomicUsize,
    errors: AtomicU64,
    visited: AtomicU64,
    bytes: AtomicU64,

    accepting: AtomicBool,
    halted: AtomicBool,
    cancelled: Arc<AtomicBool>,

    overflow: OverflowLog,
    sink_error: Mutex<Option<SinkError>>,
}

impl Session {
    /// Create the session for one call
    pub fn new(normalizer: Normalizer, pattern: Pattern, limits: Limits) -> Self {
        Self {
            normalizer,
            pattern,
            limits,
            seen: SeenSet::new(),
            emitted: AtomicUsize::new(0),
            directories: AtomicUsize::new(0),
            errors: AtomicU64::new(0),
            visited: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            halted: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            overflow: OverflowLog::default(),
            sink_error: Mutex::new(None),
        }
    }

    /// Share an external cancellation flag
    pub fn with_cancel(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Normalizer for this call
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Inclusion pattern for this call
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Limits for this call
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Commit `path` to the seen-set; false if it was already there
    pub fn accept(&self, path: &str) -> bool {
        self.seen.accept(path)
    }

    /// Check if a subdirectory found at `level` may be crawled
    pub fn allows_level(&self, level: u32) -> bool {
        (level as usize) < self.limits.max_depth
    }

    /// Reserve a directory task slot
    pub fn reserve_directory(&self) -> bool {
        let max = self.limits.max_directories;
        let reserved = self
            .directories
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok();
        if !reserved {
            self.record_overflow(OverflowKind::Directories);
        }
        reserved
    }

    /// Reserve one output line
    ///
    /// Exactly `max_entries` reservations succeed over the whole call.
    pub fn reserve_entry(&self) -> bool {
        let max = self.limits.max_entries;
        let reserved = self
            .emitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok();
        if !reserved {
            self.record_overflow(OverflowKind::Entries);
        }
        reserved
    }

    /// Check whether every output line has been reserved
    ///
    /// Once true no further line can be emitted, so pending enumeration and
    /// metadata lookups can be skipped.
    pub fn entries_exhausted(&self) -> bool {
        self.emitted() >= self.limits.max_entries
    }

    /// Count one overflow event, logging the first of each kind
    pub fn record_overflow(&self, kind: OverflowKind) {
        if self.overflow.record(kind) {
            warn!(limit = %kind, "Listing limit reached, truncating");
        }
    }

    /// Count an emitted error line
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an enumerated directory
    pub fn record_visit(&self) {
        self.visited.fetch_add(1, Ordering::Relaxed);
    }

    /// Add listed bytes
    pub fn record_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Stop accepting new top-level work
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Check if new top-level work is accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst) && !self.is_cancelled()
    }

    /// Stop accepting and skip every queued task
    pub fn halt(&self) {
        self.stop_accepting();
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Check if queued tasks must be skipped
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst) || self.is_cancelled()
    }

    /// Check if the caller cancelled the listing
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Record a sink failure and halt; only the first failure is kept
    pub fn fail_sink(&self, error: SinkError) {
        let mut slot = self.sink_error.lock();
        if slot.is_none() {
            warn!(error = %error, "Output sink failed, stopping listing");
            *slot = Some(error);
        }
        drop(slot);
        self.halt();
    }

    /// Take the recorded sink failure, if any
    pub fn take_sink_error(&self) -> Option<SinkError> {
        self.sink_error.lock().take()
    }

    /// Lines emitted so far
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Error lines emitted so far
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Directories enumerated so far
    pub fn visited(&self) -> u64 {
        self.visited.load(Ordering::Relaxed)
    }

    /// Bytes listed so far
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Overflow events so far
    pub fn overflow(&self) -> OverflowSummary {
        self.overflow.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn session(limits: Limits) -> Session {
        Session::new(Normalizer::new("/a"), Pattern::Any, limits)
    }

    const LIMITS: Limits = Limits {
        max_depth: 2,
        max_entries: 5,
        max_directories: 3,
    };

    #[test]
    fn test_entry_reservation_is_exact() {
        let session = Arc::new(session(Limits {
            max_entries: 100,
            ..LIMITS
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                thread::spawn(move || (0..50).filter(|_| session.reserve_entry()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(granted, 100);
        assert_eq!(session.emitted(), 100);
        assert_eq!(session.overflow().entries, 300);
    }

    #[test]
    fn test_entries_exhausted_after_last_reservation() {
        let s = session(LIMITS);
        for _ in 0..4 {
            assert!(s.reserve_entry());
            assert!(!s.entries_exhausted());
        }
        assert!(s.reserve_entry());
        assert!(s.entries_exhausted());
        assert!(!s.reserve_entry());
        assert_eq!(s.overflow().entries, 1);
    }

    #[test]
    fn test_directory_cap() {
        let s = session(LIMITS);
        assert!(s.reserve_directory());
        assert!(s.reserve_directory());
        assert!(s.reserve_directory());
        assert!(!s.reserve_directory());
        assert_eq!(s.overflow().count(OverflowKind::Directories), 1);
    }

    #[test]
    fn test_levels() {
        let s = session(LIMITS);
        assert!(s.allows_level(1));
        assert!(!s.allows_level(2));
    }

    #[test]
    fn test_halt_stops_accepting() {
        let s = session(LIMITS);
        assert!(s.is_accepting());
        s.fail_sink(SinkError::Closed);
        assert!(!s.is_accepting());
        assert!(s.is_halted());
        assert!(matches!(s.take_sink_error(), Some(SinkError::Closed)));
        assert!(s.take_sink_error().is_none());
    }

    #[test]
    fn test_external_cancel() {
        let flag = Arc::new(AtomicBool::new(false));
        let s = session(LIMITS).with_cancel(Arc::clone(&flag));
        assert!(!s.is_halted());

        flag.store(true, Ordering::SeqCst);
        assert!(s.is_halted());
        assert!(s.is_cancelled());
        assert!(!s.is_accepting());
    }
}
