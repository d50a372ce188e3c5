//! remote-walker - Concurrent Recursive Listing Engine
//!
//! Lists a directory-like hierarchy (a filesystem, an object-store prefix, an
//! HTTP index tree...) into a flat collection of canonical `ls -l` style
//! lines, using a bounded pool of worker threads.
//!
//! # Features
//!
//! - **Pluggable sources**: anything implementing [`ResourceEnumerator`]
//!   can be listed; paginated protocols plug in through [`source::Paginated`].
//!
//! - **Bounded fan-out**: a fixed worker pool consumes a bounded task queue;
//!   a full queue blocks the submitter instead of growing memory.
//!
//! - **Soft failures**: an unreadable entry becomes an in-line `err:` line and
//!   never aborts the listing.
//!
//! - **Graceful truncation**: depth, entry and directory limits truncate the
//!   listing and are reported once, never raised.
//!
//! - **Push acquisition**: entries can be collected from pub/sub
//!   notifications for a bounded window instead of being enumerated.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │  ResourceEnumerator  │        │    PushAdapter       │
//! │  (pull, per dir)     │        │  (window of events)  │
//! └──────────┬───────────┘        └──────────┬───────────┘
//!            │ RawEntry                      │ RawEntry
//!            └──────────────┬────────────────┘
//!                           ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Fan-out Scheduler                       │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐    ┌─────────┐   │
//! │  │Worker 1 │  │Worker 2 │  │Worker 3 │ .. │Worker N │   │
//! │  └────┬────┘  └────┬────┘  └────┬────┘    └────┬────┘   │
//! │       └────────────┴─────┬──────┴──────────────┘        │
//! │         Normalizer → Dedup & Filter → limits            │
//! └──────────────────────────┬──────────────────────────────┘
//!                            ▼
//!                ┌──────────────────────┐
//!                │     Output Sink      │
//!                │  batch / streaming   │
//!                └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use remote_walker::{ListingRequest, Lister, LocalEnumerator};
//! use std::sync::Arc;
//!
//! let lister = Lister::new(Arc::new(LocalEnumerator::new()));
//! let listing = lister
//!     .list_to_collection(&ListingRequest::new("/data").max_depth(2).sort_by_name(true))
//!     .expect("listing failed");
//! for line in &listing.lines {
//!     println!("{}", line);
//! }
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod progress;
pub mod push;
pub mod sink;
pub mod source;
pub mod walker;

pub use config::{CliArgs, ListingRequest, RunConfig};
pub use entry::{NormalizedEntry, Normalizer, SymlinkPolicy};
pub use error::{ListerError, Result};
pub use filter::{FilterKind, Pattern, SeenSet};
pub use push::{ChannelBroker, FieldRules, PushConfig, PushConnector};
pub use sink::{BatchSink, OutputSink, StreamingSink};
pub use source::local::LocalEnumerator;
pub use source::{RawEntry, ResourceEnumerator};
pub use walker::{CancelHandle, Lister, Listing, ListingReport};
