//! Parallel listing engine
//!
//! This module implements a bounded fan-out crawler: a fixed pool of worker
//! threads pulls directory tasks from a bounded queue, enumerates each
//! directory, emits normalized lines to the sink and submits subdirectories
//! back to the queue.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │        Lister           │
//!                     │  - per-call Session     │
//!                     │  - push window (opt.)   │
//!                     └───────────┬─────────────┘
//!                                 │ root task
//!                     ┌───────────▼─────────────┐
//!                     │   Work Queue (bounded)  │◄──────────┐
//!                     └───────────┬─────────────┘           │
//!       ┌─────────────────────────┼─────────────────────────┐
//!       │                         │                         │ subdirs
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │  Worker 1 │             │  Worker 2 │             │  Worker N │
//! │ enumerate │             │ enumerate │             │ enumerate │
//! │  probe    │             │  probe    │             │  probe    │
//! └─────┬─────┘             └─────┬─────┘             └─────┬─────┘
//!       └─────────────────────────┼─────────────────────────┘
//!                                 ▼
//!                     ┌─────────────────────────┐
//!                     │  Output Sink            │
//!                     │  (batch or streaming)   │
//!                     └─────────────────────────┘
//! ```

pub mod coordinator;
pub mod queue;
pub mod session;
pub mod worker;

pub use coordinator::{
    CancelHandle, Lister, Listing, ListingProgress, ListingReport, ProgressProbe, Scheduler,
    SchedulerState,
};
pub use queue::{CrawlTask, QueueStats, WorkQueue};
pub use session::{Limits, OverflowKind, OverflowSummary, Session};
pub use worker::{TaskContext, Worker, WorkerStats};
