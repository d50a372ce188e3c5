//! Work queue with backpressure support
//!
//! A bounded queue of directory tasks shared by all workers. Submitting to a
//! full queue blocks the submitter; it never drops a task or fails fast.
//!
//! Completion is tracked with a pending counter instead of "queue empty and
//! nobody busy": a task is counted when it is created and uncounted once it
//! has been fully processed (its own children counted first), so the counter
//! only reaches zero when no reachable work is left anywhere.

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A task to expand one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    /// Directory path as understood by the enumerator
    pub directory: String,

    /// Display path of the directory (relative to the listing root)
    pub display: String,

    /// Recursion level (0 = root)
    pub level: u32,
}

impl CrawlTask {
    /// Create a task for a subdirectory found at `parent.level`
    pub fn child_of(parent: &CrawlTask, directory: String, display: String) -> Self {
        Self {
            directory,
            display,
            level: parent.level + 1,
        }
    }

    /// Create the root task
    pub fn root(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            display: String::new(),
            level: 0,
        }
    }
}

/// Statistics for the work queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total tasks enqueued
    pub enqueued: AtomicU64,

    /// Total tasks dequeued
    pub dequeued: AtomicU64,

    /// Tasks processed inline due to backpressure
    pub inline_processed: AtomicU64,

    /// Number of times a submitter found the queue full
    pub backpressure_events: AtomicU64,
}

impl QueueStats {
    /// Get queue throughput (dequeued tasks)
    pub fn throughput(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    /// Get number of inline-processed tasks
    pub fn inline_count(&self) -> u64 {
        self.inline_processed.load(Ordering::Relaxed)
    }

    /// Get backpressure event count
    pub fn backpressure_count(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }
}

/// Bounded task queue
pub struct WorkQueue {
    sender: Sender<CrawlTask>,
    receiver: Receiver<CrawlTask>,
    capacity: usize,

    /// Number of workers currently processing a task
    active_workers: Arc<AtomicUsize>,

    /// Tasks created but not yet fully processed
    pending: Arc<AtomicUsize>,

    stats: Arc<QueueStats>,
}

impl WorkQueue {
    /// Create a new work queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));

        Self {
            sender,
            receiver,
            capacity: capacity.max(1),
            active_workers: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Get a sender for this queue (clone for each worker)
    pub fn sender(&self) -> WorkQueueSender {
        WorkQueueSender {
            sender: self.sender.clone(),
            pending: Arc::clone(&self.pending),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Get a receiver for this queue (clone for each worker)
    pub fn receiver(&self) -> WorkQueueReceiver {
        WorkQueueReceiver {
            receiver: self.receiver.clone(),
            active_workers: Arc::clone(&self.active_workers),
            pending: Arc::clone(&self.pending),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Number of workers currently processing a task
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Get queue statistics
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Get queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks created but not yet fully processed
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Check if all work is complete
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }
}

/// Handle for sending tasks to the queue
#[derive(Clone)]
pub struct WorkQueueSender {
    sender: Sender<CrawlTask>,
    pending: Arc<AtomicUsize>,
    stats: Arc<QueueStats>,
}

impl WorkQueueSender {
    /// Count a newly created task as pending
    ///
    /// Must happen before the parent task is marked done.
    pub fn register(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Submit a new task, blocking while the queue is full
    ///
    /// Returns the task back if every receiver is gone.
    pub fn submit(&self, task: CrawlTask) -> Result<(), CrawlTask> {
        self.register();
        if self.sender.is_full() {
            self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
        }
        match self.sender.send(task) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(e.into_inner())
            }
        }
    }

    /// Try to enqueue an already registered task, waiting up to `timeout`
    ///
    /// Returns the task back on timeout so the caller can process it inline.
    pub fn send_timeout(&self, task: CrawlTask, timeout: Duration) -> Result<(), CrawlTask> {
        match self.sender.try_send(task) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(TrySendError::Full(task)) => {
                self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
                match self.sender.send_timeout(task, timeout) {
                    Ok(()) => {
                        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(SendTimeoutError::Timeout(task))
                    | Err(SendTimeoutError::Disconnected(task)) => Err(task),
                }
            }
            Err(TrySendError::Disconnected(task)) => Err(task),
        }
    }

    /// Record that a task was processed inline (for stats)
    pub fn record_inline(&self) {
        self.stats.inline_processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for receiving tasks from the queue
#[derive(Clone)]
pub struct WorkQueueReceiver {
    receiver: Receiver<CrawlTask>,
    active_workers: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    stats: Arc<QueueStats>,
}

impl WorkQueueReceiver {
    /// Try to receive a task without blocking
    pub fn try_recv(&self) -> Option<CrawlTask> {
        match self.receiver.try_recv() {
            Ok(task) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Some(task)
            }
            Err(_) => None,
        }
    }

    /// Receive with timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CrawlTask> {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Some(task)
            }
            Err(_) => None,
        }
    }

    /// Mark this worker as active
    pub fn begin_work(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark this worker as idle
    pub fn end_work(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Mark one task as fully processed
    pub fn task_done(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of workers currently processing a task
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Tasks created but not yet fully processed
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// RAII guard for marking work as active
pub struct WorkGuard<'a> {
    receiver: &'a WorkQueueReceiver,
}

impl<'a> WorkGuard<'a> {
    /// Create a new work guard (marks worker as active)
    pub fn new(receiver: &'a WorkQueueReceiver) -> Self {
        receiver.begin_work();
        Self { receiver }
    }
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.receiver.end_work();
    }
}

/// RAII guard that marks one task done when dropped
pub struct TaskGuard<'a> {
    receiver: &'a WorkQueueReceiver,
}

impl<'a> TaskGuard<'a> {
    /// Track one registered task
    pub fn new(receiver: &'a WorkQueueReceiver) -> Self {
        Self { receiver }
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.receiver.task_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_queue_basic() {
        let queue = WorkQueue::new(10);

        queue.sender().submit(CrawlTask::root("/test")).unwrap();
        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 1);

        let receiver = queue.receiver();
        let task = receiver.try_recv().unwrap();
        assert_eq!(task.directory, "/test");
        assert_eq!(task.level, 0);
    }

    #[test]
    fn test_submit_blocks_when_full() {
        let queue = WorkQueue::new(2);
        let sender = queue.sender();
        let receiver = queue.receiver();

        sender.submit(CrawlTask::root("/a")).unwrap();
        sender.submit(CrawlTask::root("/b")).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let handle = {
            let sender = sender.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                sender.submit(CrawlTask::root("/c")).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(200));
        assert!(!done.load(Ordering::SeqCst), "submit should block on a full queue");
        assert_eq!(queue.len(), 2);

        receiver.try_recv().unwrap();
        handle.join().unwrap();

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.stats().backpressure_count(), 1);
    }

    #[test]
    fn test_send_timeout_returns_task() {
        let queue = WorkQueue::new(1);
        let sender = queue.sender();

        sender.submit(CrawlTask::root("/a")).unwrap();
        sender.register();
        let task = CrawlTask::root("/b");
        let back = sender
            .send_timeout(task.clone(), Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(back, task);
    }

    #[test]
    fn test_pending_completion() {
        let queue = WorkQueue::new(10);
        let sender = queue.sender();
        let receiver = queue.receiver();

        assert!(queue.is_complete());

        sender.submit(CrawlTask::root("/test")).unwrap();
        assert!(!queue.is_complete());

        let task = receiver.try_recv().unwrap();
        {
            let _done = TaskGuard::new(&receiver);
            let _active = WorkGuard::new(&receiver);
            assert_eq!(queue.active_workers(), 1);

            // child registered before the parent completes
            sender.register();
            sender
                .send_timeout(
                    CrawlTask::child_of(&task, "/test/sub".into(), "sub".into()),
                    Duration::from_millis(10),
                )
                .unwrap();
        }

        assert!(!queue.is_complete());
        let child = receiver.try_recv().unwrap();
        assert_eq!(child.level, 1);
        receiver.task_done();

        assert!(queue.is_complete());
        assert_eq!(queue.active_workers(), 0);
    }
}
