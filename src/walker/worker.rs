//! Worker thread logic for parallel listing
//!
//! Each worker:
//! - Pulls directory tasks from the work queue
//! - Enumerates the directory through the shared enumerator
//! - Probes entries whose metadata or kind is still unknown
//! - Sends accepted lines to the output sink
//! - Sends each subdirectory to the work queue as soon as it is found
//!
//! When the queue stays full, a worker keeps that subdirectory task and
//! processes it inline (depth first, on a heap backlog) instead of waiting
//! forever, so a pool whose workers are all submitting cannot deadlock.
//! Once the entry limit is used up, no further directory is enumerated and
//! no further metadata lookup is issued.

use crate::entry::{NormalizedEntry, Normalizer};
use crate::error::{EnumResult, EnumerationError, ListOutcome, SetupError};
use crate::sink::OutputSink;
use crate::source::{EntryKind, Metadata, RawEntry, ResourceEnumerator};
use crate::walker::queue::{CrawlTask, TaskGuard, WorkGuard, WorkQueueReceiver, WorkQueueSender};
use crate::walker::session::{OverflowKind, Session};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// How long a worker waits on a full queue before processing a task inline
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(50);

/// How long a worker waits for a task before re-checking shutdown
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Everything a worker needs to process tasks of one listing call
pub struct TaskContext {
    /// Source of directory listings and probes
    pub enumerator: Arc<dyn ResourceEnumerator>,

    /// Per-call shared state
    pub session: Arc<Session>,

    /// Destination of emitted lines
    pub sink: Arc<dyn OutputSink>,
}

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Directories enumerated
    pub dirs_processed: AtomicU64,

    /// Lines emitted
    pub lines_emitted: AtomicU64,

    /// Metadata probes issued
    pub probes: AtomicU64,

    /// Enumeration and probe failures
    pub errors: AtomicU64,

    /// Tasks skipped after the listing halted
    pub skipped: AtomicU64,
}

impl WorkerStats {
    fn record_dir(&self) {
        self.dirs_processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_line(&self) {
        self.lines_emitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_probe(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }
}

/// A worker thread that processes crawl tasks
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a new worker thread
    pub fn spawn(
        id: usize,
        ctx: Arc<TaskContext>,
        queue_rx: WorkQueueReceiver,
        queue_tx: WorkQueueSender,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, SetupError> {
        let stats = Arc::new(WorkerStats::default());
        let runner = TaskRunner {
            id,
            ctx,
            queue_rx,
            queue_tx,
            stats: Arc::clone(&stats),
        };

        let handle = thread::Builder::new()
            .name(format!("lister-{}", id))
            .spawn(move || worker_loop(runner, shutdown))
            .map_err(|e| SetupError::WorkerSpawn {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Check if the thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the worker to finish; `Err` if it panicked
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// Main worker loop
fn worker_loop(runner: TaskRunner, shutdown: Arc<AtomicBool>) {
    debug!(worker = runner.id, "Worker starting");

    while !shutdown.load(Ordering::Relaxed) {
        let task = match runner.queue_rx.recv_timeout(RECV_TIMEOUT) {
            Some(task) => task,
            None => continue,
        };

        let _active = WorkGuard::new(&runner.queue_rx);
        runner.run(task);
    }

    debug!(
        worker = runner.id,
        dirs = runner.stats.dirs_processed.load(Ordering::Relaxed),
        lines = runner.stats.lines_emitted.load(Ordering::Relaxed),
        "Worker shutting down"
    );
}

/// Processes tasks for one worker thread
pub(crate) struct TaskRunner {
    id: usize,
    ctx: Arc<TaskContext>,
    queue_rx: WorkQueueReceiver,
    queue_tx: WorkQueueSender,
    stats: Arc<WorkerStats>,
}

impl TaskRunner {
    /// Process `first` and every task that could not be queued
    fn run(&self, first: CrawlTask) {
        let mut backlog = Vec::new();
        self.complete(first, &mut backlog);

        while let Some(task) = backlog.pop() {
            self.complete(task, &mut backlog);
        }
    }

    /// Process one registered task and mark it done
    fn complete(&self, task: CrawlTask, backlog: &mut Vec<CrawlTask>) {
        let _done = TaskGuard::new(&self.queue_rx);
        let outcome = self.process_directory(&task, backlog);

        match &outcome {
            ListOutcome::Success { entries, subdirs, .. } => {
                trace!(
                    worker = self.id,
                    path = %task.directory,
                    entries = entries,
                    subdirs = subdirs,
                    "Directory processed"
                );
            }
            ListOutcome::Skipped { path, reason } => {
                trace!(worker = self.id, path = %path, reason = %reason, "Directory skipped");
            }
            ListOutcome::Failed { path, error } => {
                debug!(worker = self.id, path = %path, error = %error, "Directory failed");
            }
        }
    }

    /// Expand one directory
    fn process_directory(&self, task: &CrawlTask, backlog: &mut Vec<CrawlTask>) -> ListOutcome {
        let session = &self.ctx.session;

        if session.is_halted() {
            self.stats.record_skip();
            return ListOutcome::Skipped {
                path: task.directory.clone(),
                reason: "listing halted".into(),
            };
        }
        if self.entries_exhausted() {
            self.stats.record_skip();
            return ListOutcome::Skipped {
                path: task.directory.clone(),
                reason: "entry limit reached".into(),
            };
        }

        let entries = match self.ctx.enumerator.enumerate(&task.directory) {
            Ok(entries) => entries,
            Err(e) => {
                self.stats.record_error();
                let entry = session.normalizer().failure(&task.directory, &e);
                self.emit(&entry);
                return ListOutcome::Failed {
                    path: task.directory.clone(),
                    error: e,
                };
            }
        };

        session.record_visit();
        self.stats.record_dir();

        let mut entry_count = 0;
        let mut subdir_count = 0;

        for raw in entries {
            if session.is_halted() || self.entries_exhausted() {
                break;
            }
            if raw.is_special() {
                continue;
            }

            let full_path = raw.full_path();
            if session.normalizer().is_self_reference(&full_path) {
                trace!(path = %full_path, "Discarding reference to the listing root");
                continue;
            }

            entry_count += 1;
            if self.process_entry(task, raw, full_path, backlog) {
                subdir_count += 1;
            }
        }

        ListOutcome::Success {
            path: task.directory.clone(),
            entries: entry_count,
            subdirs: subdir_count,
        }
    }

    /// Handle one child; returns true if a subdirectory task was created
    fn process_entry(
        &self,
        task: &CrawlTask,
        mut raw: RawEntry,
        full_path: String,
        backlog: &mut Vec<CrawlTask>,
    ) -> bool {
        let session = &self.ctx.session;
        let normalizer = session.normalizer();

        if self.entries_exhausted() {
            return false;
        }

        // An unclassified entry is probed first: the probe decides whether
        // it is crawled or listed.
        let mut failed_probe: Option<EnumerationError> = None;
        let mut probed = false;
        if raw.kind.is_unknown() && !raw.has_metadata() {
            probed = true;
            match self.probe(&full_path) {
                Ok(metadata) => raw.apply_probe(metadata),
                Err(e) => failed_probe = Some(e),
            }
        }

        let kind = match failed_probe {
            Some(_) => EntryKind::Unknown,
            None => Normalizer::classify(&raw),
        };

        let display = normalizer.display_name(&full_path);
        if kind.is_dir() {
            if self.entries_exhausted() {
                return false;
            }
            return self.expand(task, full_path, display, backlog);
        }

        if !session.pattern().matches(&display) {
            trace!(path = %full_path, "Discarding (wrong pattern)");
            return false;
        }
        if !session.accept(&full_path) {
            trace!(path = %full_path, "Discarding (duplicate)");
            return false;
        }

        let probe = match failed_probe {
            Some(e) => Some(Err(e)),
            None if !probed && !raw.has_metadata() => {
                if self.entries_exhausted() {
                    return false;
                }
                Some(self.probe(&full_path))
            }
            None => None,
        };

        let entry = normalizer.normalize(raw, probe);
        self.emit(&entry);
        false
    }

    /// Check the entry limit, counting the skipped work as overflow
    fn entries_exhausted(&self) -> bool {
        let exhausted = self.ctx.session.entries_exhausted();
        if exhausted {
            self.ctx.session.record_overflow(OverflowKind::Entries);
        }
        exhausted
    }

    fn probe(&self, path: &str) -> EnumResult<Metadata> {
        self.stats.record_probe();
        let result = self.ctx.enumerator.probe(path);
        if let Err(e) = &result {
            self.stats.record_error();
            debug!(path = path, error = %e, "Metadata probe failed");
        }
        result
    }

    /// Queue a subdirectory if it is new and within the limits
    ///
    /// The task goes to the shared queue right away. If the queue stays full
    /// it lands on `backlog` and this worker processes it after the current
    /// directory.
    fn expand(
        &self,
        task: &CrawlTask,
        directory: String,
        display: String,
        backlog: &mut Vec<CrawlTask>,
    ) -> bool {
        let session = &self.ctx.session;

        if !session.accept(&directory) {
            trace!(path = %directory, "Discarding (duplicate directory)");
            return false;
        }
        if !session.allows_level(task.level + 1) {
            trace!(path = %directory, level = task.level + 1, "Discarding (max-depth)");
            session.record_overflow(OverflowKind::Depth);
            return false;
        }
        if !session.reserve_directory() {
            trace!(path = %directory, "Discarding (max-directories)");
            return false;
        }

        self.queue_tx.register();
        let child = CrawlTask::child_of(task, directory, display);
        if session.is_halted() {
            backlog.push(child);
            return true;
        }
        if let Err(child) = self.queue_tx.send_timeout(child, BACKPRESSURE_WAIT) {
            self.queue_tx.record_inline();
            trace!(worker = self.id, path = %child.directory, "Queue full, processing inline");
            backlog.push(child);
        }
        true
    }

    /// Send one normalized entry to the sink, within the entry limit
    fn emit(&self, entry: &NormalizedEntry) {
        let session = &self.ctx.session;
        if !session.reserve_entry() {
            return;
        }

        match self.ctx.sink.add(&entry.to_line()) {
            Ok(()) => {
                self.stats.record_line();
                if entry.is_error() {
                    session.record_error();
                } else {
                    session.record_bytes(entry.listed_bytes());
                }
            }
            Err(e) => session.fail_sink(e),
        }
    }
}

/// Aggregate statistics from multiple workers
pub fn aggregate_stats(workers: &[Worker]) -> (u64, u64, u64, u64, u64) {
    let mut dirs = 0u64;
    let mut lines = 0u64;
    let mut probes = 0u64;
    let mut errors = 0u64;
    let mut skipped = 0u64;

    for worker in workers {
        dirs += worker.stats.dirs_processed.load(Ordering::Relaxed);
        lines += worker.stats.lines_emitted.load(Ordering::Relaxed);
        probes += worker.stats.probes.load(Ordering::Relaxed);
        errors += worker.stats.errors.load(Ordering::Relaxed);
        skipped += worker.stats.skipped.load(Ordering::Relaxed);
    }

    (dirs, lines, probes, errors, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Pattern;
    use crate::sink::BatchSink;
    use crate::walker::queue::WorkQueue;
    use crate::walker::session::Limits;

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::default();

        stats.record_dir();
        stats.record_line();
        stats.record_probe();
        stats.record_error();
        stats.record_skip();

        assert_eq!(stats.dirs_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.lines_emitted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.probes.load(Ordering::Relaxed), 1);
        assert_eq!(stats.errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.skipped.load(Ordering::Relaxed), 1);
    }

    /// Root with one file, one unknown entry that probes as a directory,
    /// and one unknown entry whose probe fails
    struct Mixed;

    impl ResourceEnumerator for Mixed {
        fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>> {
            match directory {
                "/r" => Ok(vec![
                    RawEntry::file("/r", "f1").with_size(3).with_mtime(1),
                    RawEntry::new("/r", "d/", EntryKind::Unknown),
                    RawEntry::new("/r", "broken", EntryKind::Unknown),
                    RawEntry::dir("/r", ".."),
                ]),
                _ => Ok(vec![]),
            }
        }

        fn probe(&self, path: &str) -> EnumResult<Metadata> {
            match path {
                "/r/d/" => Ok(Metadata {
                    kind: EntryKind::Directory,
                    ..Default::default()
                }),
                _ => Err(EnumerationError::Timeout {
                    path: path.into(),
                    after: Duration::from_secs(1),
                }),
            }
        }
    }

    fn runner(
        queue: &WorkQueue,
        enumerator: Arc<dyn ResourceEnumerator>,
        limits: Limits,
    ) -> (TaskRunner, Arc<Session>, Arc<BatchSink>) {
        let session = Arc::new(Session::new(Normalizer::new("/r"), Pattern::Any, limits));
        let sink = Arc::new(BatchSink::new());
        let runner = TaskRunner {
            id: 0,
            ctx: Arc::new(TaskContext {
                enumerator,
                session: Arc::clone(&session),
                sink: sink.clone(),
            }),
            queue_rx: queue.receiver(),
            queue_tx: queue.sender(),
            stats: Arc::new(WorkerStats::default()),
        };
        (runner, session, sink)
    }

    const OPEN: Limits = Limits {
        max_depth: 5,
        max_entries: 100,
        max_directories: 100,
    };

    #[test]
    fn test_process_directory_queues_children() {
        let queue = WorkQueue::new(4);
        let (runner, session, sink) = runner(&queue, Arc::new(Mixed), OPEN);

        let mut backlog = Vec::new();
        queue.sender().register();
        runner.complete(CrawlTask::root("/r"), &mut backlog);

        assert!(backlog.is_empty());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending(), 1);
        let child = queue.receiver().try_recv().unwrap();
        assert_eq!(child.directory, "/r/d/");
        assert_eq!(child.level, 1);

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|l| l.ends_with(" f1")));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("err:") && l.contains(" broken (exception: Timed out")));
        assert_eq!(session.errors(), 1);
    }

    /// Root with `n` subdirectories and nothing else
    struct Fanout(usize);

    impl ResourceEnumerator for Fanout {
        fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>> {
            match directory {
                "/r" => Ok((0..self.0)
                    .map(|i| RawEntry::dir("/r", &format!("d{}/", i)))
                    .collect()),
                _ => Ok(vec![]),
            }
        }

        fn probe(&self, path: &str) -> EnumResult<Metadata> {
            Err(EnumerationError::NotFound { path: path.into() })
        }
    }

    #[test]
    fn test_full_queue_keeps_children_inline() {
        let queue = WorkQueue::new(2);
        let (runner, _session, _sink) = runner(&queue, Arc::new(Fanout(5)), OPEN);

        let mut backlog = Vec::new();
        queue.sender().register();
        runner.complete(CrawlTask::root("/r"), &mut backlog);

        assert_eq!(queue.len(), 2);
        assert_eq!(backlog.len(), 3);
        assert_eq!(queue.pending(), 5);
        assert_eq!(queue.stats().inline_count(), 3);
        assert!(backlog.iter().all(|t| t.level == 1));
    }

    /// Counts every enumeration and metadata lookup
    #[derive(Default)]
    struct Counting {
        enumerations: AtomicU64,
        lookups: AtomicU64,
    }

    impl ResourceEnumerator for Counting {
        fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            Ok((0..10)
                .map(|i| RawEntry::file(directory, &format!("f{}", i)))
                .chain(std::iter::once(RawEntry::new(directory, "sub/", EntryKind::Unknown)))
                .collect())
        }

        fn probe(&self, _path: &str) -> EnumResult<Metadata> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Metadata {
                size: Some(1),
                mtime: Some(1),
                kind: EntryKind::File,
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_exhausted_entry_limit_stops_work() {
        let queue = WorkQueue::new(4);
        let counting = Arc::new(Counting::default());
        let (runner, session, sink) = runner(
            &queue,
            counting.clone(),
            Limits {
                max_entries: 3,
                ..OPEN
            },
        );

        let mut backlog = Vec::new();
        queue.sender().register();
        runner.complete(CrawlTask::root("/r"), &mut backlog);

        assert_eq!(sink.lines().len(), 3);
        assert!(session.entries_exhausted());
        assert_eq!(counting.enumerations.load(Ordering::SeqCst), 1);
        assert_eq!(counting.lookups.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
        assert!(backlog.is_empty());
        assert!(session.overflow().entries > 0);

        // A task queued before the limit was reached is skipped unlisted
        queue.sender().register();
        runner.complete(CrawlTask::root("/r/other"), &mut backlog);
        assert_eq!(counting.enumerations.load(Ordering::SeqCst), 1);
        assert_eq!(runner.stats.skipped.load(Ordering::Relaxed), 1);
        assert_eq!(queue.pending(), 0);
    }
}
