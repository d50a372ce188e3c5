//! Listing coordinator - orchestrates one listing call
//!
//! The coordinator is responsible for:
//! - Creating the per-call session and work queue
//! - Driving the scheduler through CREATED, RUNNING, DRAINING, TERMINATED
//! - Running a push collection window before the crawl when requested
//! - Progress reporting and cooperative cancellation
//! - Turning worker results into a [`ListingReport`]

use crate::config::ListingRequest;
use crate::entry::sort_lines;
use crate::error::{ListerError, Result, SetupError};
use crate::push::{PushAdapter, PushConnector, PushStats, SnapshotEnumerator};
use crate::sink::{BatchSink, OutputSink};
use crate::source::ResourceEnumerator;
use crate::walker::queue::{CrawlTask, WorkQueue, WorkQueueReceiver};
use crate::walker::session::{OverflowSummary, Session};
use crate::walker::worker::{aggregate_stats, TaskContext, Worker};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the joining caller checks for completion
const COMPLETION_POLL: Duration = Duration::from_millis(10);

/// How often progress callbacks fire
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of a [`Scheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    /// Pool not started; root tasks may be queued
    Created = 0,
    /// Workers are pulling tasks
    Running = 1,
    /// No more top-level submissions; queued work continues
    Draining = 2,
    /// All work done and workers joined
    Terminated = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Created,
            1 => SchedulerState::Running,
            2 => SchedulerState::Draining,
            _ => SchedulerState::Terminated,
        }
    }
}

/// Bounded worker pool for one listing call
pub struct Scheduler {
    ctx: Arc<TaskContext>,
    queue: WorkQueue,
    worker_count: usize,
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
    state: AtomicU8,
}

impl Scheduler {
    /// Create a scheduler in the CREATED state
    pub fn new(ctx: Arc<TaskContext>, worker_count: usize, queue_size: usize) -> Self {
        Self {
            ctx,
            queue: WorkQueue::new(queue_size),
            worker_count: worker_count.max(1),
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            state: AtomicU8::new(SchedulerState::Created as u8),
        }
    }

    /// Current state
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SchedulerState) {
        debug!(state = ?state, "Scheduler state change");
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Queue a top-level task, blocking while the queue is full
    pub fn submit(&self, task: CrawlTask) -> Result<()> {
        let state = self.state();
        if !matches!(state, SchedulerState::Created | SchedulerState::Running)
            || !self.ctx.session.is_accepting()
        {
            return Err(ListerError::Interrupted);
        }

        self.queue
            .sender()
            .submit(task)
            .map_err(|_| ListerError::Interrupted)
    }

    /// Spawn the worker pool
    ///
    /// If any worker fails to start, the ones already running are stopped
    /// and the scheduler is TERMINATED.
    pub fn start(&mut self) -> std::result::Result<(), SetupError> {
        if self.state() != SchedulerState::Created {
            return Err(SetupError::AlreadyStarted);
        }

        for id in 0..self.worker_count {
            match Worker::spawn(
                id,
                Arc::clone(&self.ctx),
                self.queue.receiver(),
                self.queue.sender(),
                Arc::clone(&self.shutdown),
            ) {
                Ok(worker) => self.workers.push(worker),
                Err(e) => {
                    warn!(error = %e, "Worker pool could not be started");
                    self.ctx.session.halt();
                    self.stop_workers();
                    self.set_state(SchedulerState::Terminated);
                    return Err(e);
                }
            }
        }

        info!(count = self.workers.len(), "Workers spawned");
        self.set_state(SchedulerState::Running);
        Ok(())
    }

    /// Stop accepting top-level submissions
    pub fn drain(&self) {
        if self.state() == SchedulerState::Running {
            self.set_state(SchedulerState::Draining);
        }
    }

    /// Wait for all work to finish, then stop the pool
    ///
    /// Returns false when the call was halted (cancelled or sink failure) or a
    /// worker died before the work was done.
    pub fn join(&mut self) -> bool {
        if self.state() == SchedulerState::Terminated {
            return false;
        }
        self.drain();

        let finished = self.wait_for_completion();
        self.stop_workers();
        self.set_state(SchedulerState::Terminated);

        finished && !self.ctx.session.is_halted()
    }

    fn wait_for_completion(&self) -> bool {
        loop {
            if self.queue.is_complete() {
                return true;
            }
            if !self.workers.is_empty() && self.workers.iter().all(Worker::is_finished) {
                warn!(pending = self.queue.pending(), "All workers exited with work pending");
                return false;
            }
            thread::sleep(COMPLETION_POLL);
        }
    }

    fn stop_workers(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let workers = std::mem::take(&mut self.workers);
        let (dirs, lines, probes, errors, skipped) = aggregate_stats(&workers);
        for worker in workers {
            let id = worker.id();
            if worker.join().is_err() {
                warn!(worker = id, "Worker panicked");
            }
        }

        debug!(
            dirs = dirs,
            lines = lines,
            probes = probes,
            errors = errors,
            skipped = skipped,
            inline = self.queue.stats().inline_count(),
            backpressure = self.queue.stats().backpressure_count(),
            "Workers joined"
        );
    }

    /// Handle for sampling progress from another thread
    pub fn probe(&self) -> ProgressProbe {
        ProgressProbe {
            session: Arc::clone(&self.ctx.session),
            queue: self.queue.receiver(),
            total_workers: self.worker_count,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.ctx.session.halt();
            self.stop_workers();
        }
    }
}

/// Samples [`ListingProgress`] from a running call
#[derive(Clone)]
pub struct ProgressProbe {
    session: Arc<Session>,
    queue: WorkQueueReceiver,
    total_workers: usize,
}

impl ProgressProbe {
    /// Snapshot of the call after `elapsed`
    pub fn sample(&self, elapsed: Duration) -> ListingProgress {
        ListingProgress {
            dirs: self.session.visited(),
            emitted: self.session.emitted() as u64,
            errors: self.session.errors(),
            bytes: self.session.bytes(),
            queue_size: self.queue.len(),
            pending: self.queue.pending(),
            active_workers: self.queue.active_workers(),
            total_workers: self.total_workers,
            elapsed,
        }
    }
}

/// Progress information for display
#[derive(Debug, Clone)]
pub struct ListingProgress {
    /// Directories enumerated
    pub dirs: u64,

    /// Lines emitted
    pub emitted: u64,

    /// Error lines emitted
    pub errors: u64,

    /// Bytes listed
    pub bytes: u64,

    /// Current queue size
    pub queue_size: usize,

    /// Directory tasks not yet finished
    pub pending: usize,

    /// Active workers
    pub active_workers: usize,

    /// Total workers
    pub total_workers: usize,

    /// Elapsed time
    pub elapsed: Duration,
}

impl ListingProgress {
    /// Calculate lines per second rate
    pub fn entries_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.emitted as f64 / secs
        } else {
            0.0
        }
    }

    /// Calculate dirs per second rate
    pub fn dirs_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.dirs as f64 / secs
        } else {
            0.0
        }
    }
}

/// Result of a completed listing call
#[derive(Debug, Clone, Serialize)]
pub struct ListingReport {
    /// Lines emitted to the sink
    pub emitted: usize,

    /// Error lines among them
    pub errors: u64,

    /// Directories enumerated
    pub directories: u64,

    /// Bytes of listed files
    pub bytes: u64,

    /// Limits that truncated the listing
    pub overflow: OverflowSummary,

    /// Collection statistics of a push-mode call
    pub push: Option<PushStats>,

    /// Time taken for the call
    pub duration: Duration,

    /// Whether the listing ran to completion (vs was cancelled)
    pub completed: bool,
}

/// Lines and report of a batch listing
#[derive(Debug, Clone)]
pub struct Listing {
    /// Canonical lines
    pub lines: Vec<String>,

    /// Call report
    pub report: ListingReport,
}

/// Cooperative cancellation for a [`Lister`]
///
/// Once cancelled, running calls skip their queued tasks and new calls are
/// refused with [`ListerError::Interrupted`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Entry point for listing calls over one enumerator
pub struct Lister {
    enumerator: Arc<dyn ResourceEnumerator>,
    connector: Option<Arc<dyn PushConnector>>,
    cancelled: Arc<AtomicBool>,
}

impl Lister {
    /// Lister over `enumerator`
    pub fn new(enumerator: Arc<dyn ResourceEnumerator>) -> Self {
        Self {
            enumerator,
            connector: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `connector` for push-mode requests
    pub fn with_push(mut self, connector: Arc<dyn PushConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Get a cancellation handle (for signal handlers)
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
        }
    }

    /// List into memory and return the lines once TERMINATED
    ///
    /// Lines are in emission order unless the request asks for name order.
    pub fn list_to_collection(&self, request: &ListingRequest) -> Result<Listing> {
        let sink = Arc::new(BatchSink::new());
        let report = self.list_to_sink(request, sink.clone())?;

        let mut lines = sink.take_lines();
        if request.sort_by_name {
            sort_lines(&mut lines);
        }
        Ok(Listing { lines, report })
    }

    /// Stream lines into `sink`; blocks until TERMINATED or a sink failure
    pub fn list_to_sink(
        &self,
        request: &ListingRequest,
        sink: Arc<dyn OutputSink>,
    ) -> Result<ListingReport> {
        self.execute(request, sink, None::<fn(ListingProgress)>)
    }

    /// Like [`Lister::list_to_sink`], calling `progress_callback` periodically
    pub fn run_with_progress<F>(
        &self,
        request: &ListingRequest,
        sink: Arc<dyn OutputSink>,
        progress_callback: F,
    ) -> Result<ListingReport>
    where
        F: Fn(ListingProgress) + Send + 'static,
    {
        self.execute(request, sink, Some(progress_callback))
    }

    fn execute<F>(
        &self,
        request: &ListingRequest,
        sink: Arc<dyn OutputSink>,
        progress_callback: Option<F>,
    ) -> Result<ListingReport>
    where
        F: Fn(ListingProgress) + Send + 'static,
    {
        request.validate()?;
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(ListerError::Interrupted);
        }

        let start = Instant::now();
        let pattern = request.compile_pattern()?;

        let (enumerator, push) = match &request.push {
            Some(push) => {
                let connector = self
                    .connector
                    .as_ref()
                    .ok_or(crate::error::ConfigError::MissingPushSetting("a push connector"))?;
                let (entries, stats) =
                    PushAdapter::new(connector.as_ref(), push).collect(&request.root, &self.cancelled)?;
                let snapshot: Arc<dyn ResourceEnumerator> = Arc::new(SnapshotEnumerator::new(
                    &request.root,
                    entries,
                    Arc::clone(&self.enumerator),
                ));
                (snapshot, Some(stats))
            }
            None => (Arc::clone(&self.enumerator), None),
        };

        info!(
            root = %request.root,
            workers = request.workers,
            max_depth = request.max_depth,
            max_entries = request.max_entries,
            push = push.is_some(),
            "Starting listing"
        );

        let session = Arc::new(
            Session::new(request.normalizer(), pattern, request.limits())
                .with_cancel(Arc::clone(&self.cancelled)),
        );
        let ctx = Arc::new(TaskContext {
            enumerator,
            session: Arc::clone(&session),
            sink: Arc::clone(&sink),
        });

        let mut scheduler = Scheduler::new(ctx, request.workers, request.queue_size);

        // The root counts as the first directory task
        session.reserve_directory();
        scheduler.submit(CrawlTask::root(request.root.clone()))?;
        scheduler.start()?;

        let progress_handle = progress_callback.map(|callback| {
            let probe = scheduler.probe();
            let done = Arc::new(AtomicBool::new(false));
            let done_flag = Arc::clone(&done);
            let handle = thread::spawn(move || {
                while !done_flag.load(Ordering::Relaxed) {
                    callback(probe.sample(start.elapsed()));
                    thread::sleep(PROGRESS_INTERVAL);
                }
            });
            (done, handle)
        });

        scheduler.drain();
        let finished = scheduler.join();

        if let Some((done, handle)) = progress_handle {
            done.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                warn!("Progress callback panicked");
            }
        }

        if let Some(e) = session.take_sink_error() {
            return Err(ListerError::Sink(e));
        }
        sink.close()?;

        let report = ListingReport {
            emitted: session.emitted(),
            errors: session.errors(),
            directories: session.visited(),
            bytes: session.bytes(),
            overflow: session.overflow(),
            push,
            duration: start.elapsed(),
            completed: finished,
        };

        info!(
            emitted = report.emitted,
            errors = report.errors,
            dirs = report.directories,
            bytes = report.bytes,
            truncated = report.overflow.truncated(),
            completed = report.completed,
            duration_ms = report.duration.as_millis() as u64,
            "Listing completed"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Normalizer;
    use crate::error::EnumResult;
    use crate::filter::Pattern;
    use crate::source::RawEntry;
    use crate::walker::session::Limits;

    #[test]
    fn test_listing_progress_rates() {
        let progress = ListingProgress {
            dirs: 1000,
            emitted: 10000,
            errors: 5,
            bytes: 1024 * 1024 * 100,
            queue_size: 500,
            pending: 520,
            active_workers: 4,
            total_workers: 8,
            elapsed: Duration::from_secs(10),
        };

        assert!((progress.entries_per_second() - 1000.0).abs() < 0.1);
        assert!((progress.dirs_per_second() - 100.0).abs() < 0.1);
    }

    /// Flat directory of `n` files under any path
    struct Flat(usize);

    impl ResourceEnumerator for Flat {
        fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>> {
            Ok((0..self.0)
                .map(|i| RawEntry::file(directory, format!("f{}", i)).with_size(1).with_mtime(1))
                .collect())
        }
    }

    fn context(files: usize) -> Arc<TaskContext> {
        Arc::new(TaskContext {
            enumerator: Arc::new(Flat(files)),
            session: Arc::new(Session::new(
                Normalizer::new("/r"),
                Pattern::Any,
                Limits {
                    max_depth: 4,
                    max_entries: 1000,
                    max_directories: 10,
                },
            )),
            sink: Arc::new(BatchSink::new()),
        })
    }

    #[test]
    fn test_scheduler_lifecycle() {
        let ctx = context(3);
        let mut scheduler = Scheduler::new(Arc::clone(&ctx), 2, 4);
        assert_eq!(scheduler.state(), SchedulerState::Created);

        scheduler.submit(CrawlTask::root("/r")).unwrap();
        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(matches!(scheduler.start(), Err(SetupError::AlreadyStarted)));

        scheduler.drain();
        assert_eq!(scheduler.state(), SchedulerState::Draining);
        assert!(matches!(
            scheduler.submit(CrawlTask::root("/other")),
            Err(ListerError::Interrupted)
        ));

        assert!(scheduler.join());
        assert_eq!(scheduler.state(), SchedulerState::Terminated);
        assert_eq!(ctx.session.emitted(), 3);
        assert_eq!(ctx.sink.size(), 3);
    }

    #[test]
    fn test_halted_session_refuses_submissions() {
        let ctx = context(1);
        ctx.session.halt();
        let scheduler = Scheduler::new(ctx, 1, 1);
        assert!(matches!(
            scheduler.submit(CrawlTask::root("/r")),
            Err(ListerError::Interrupted)
        ));
    }

    #[test]
    fn test_cancelled_lister_refuses_calls() {
        let lister = Lister::new(Arc::new(Flat(1)));
        let handle = lister.cancel_handle();
        handle.cancel();
        assert!(handle.is_cancelled());

        let result = lister.list_to_collection(&ListingRequest::new("/r"));
        assert!(matches!(result, Err(ListerError::Interrupted)));
    }
}
