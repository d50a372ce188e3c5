//! Error types for remote-walker
//!
//! This module defines the error hierarchy for a listing call:
//! - Per-entry enumeration/probe failures (absorbed into the listing as `err:` lines)
//! - Fatal setup failures (worker pool or push session could not be started)
//! - Output sink failures (streaming destination became unusable)
//! - Push transport and payload errors
//! - Configuration errors
//!
//! Only `SetupError`, `SinkError` and `Interrupted` ever unwind a listing call.
//! Everything else is recorded in-line or counted.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for a listing call
#[derive(Error, Debug)]
pub enum ListerError {
    /// Worker pool or push session could not be established
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    /// Invalid request or CLI configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The output destination failed while streaming
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Cancelled before any work was accepted
    #[error("Listing interrupted before it started")]
    Interrupted,
}

/// Failures of a single enumeration or metadata probe
///
/// These never abort a listing: the affected entry is rendered as an
/// `err:` line and the crawl continues with its siblings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnumerationError {
    /// The directory or entry does not exist (any more)
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    /// Access to the directory or entry was refused
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: String },

    /// The remote side answered with something we could not use
    #[error("Protocol error on '{path}': {message}")]
    Protocol { path: String, message: String },

    /// The remote side did not answer in time
    #[error("Timed out after {after:?}: '{path}'")]
    Timeout { path: String, after: Duration },
}

impl EnumerationError {
    /// Build a protocol error for `path`
    pub fn protocol(path: impl Into<String>, message: impl Into<String>) -> Self {
        EnumerationError::Protocol {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if a later attempt on the same path could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EnumerationError::Timeout { .. } | EnumerationError::Protocol { .. }
        )
    }

    /// Path the failure relates to
    pub fn path(&self) -> &str {
        match self {
            EnumerationError::NotFound { path }
            | EnumerationError::PermissionDenied { path }
            | EnumerationError::Protocol { path, .. }
            | EnumerationError::Timeout { path, .. } => path,
        }
    }

    /// Map an I/O error raised while accessing `path`
    pub fn from_io(path: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => EnumerationError::NotFound { path: path.into() },
            std::io::ErrorKind::PermissionDenied => {
                EnumerationError::PermissionDenied { path: path.into() }
            }
            std::io::ErrorKind::TimedOut => EnumerationError::Timeout {
                path: path.into(),
                after: Duration::ZERO,
            },
            _ => EnumerationError::protocol(path, err.to_string()),
        }
    }
}

/// Fatal errors raised before any partial result is considered valid
#[derive(Error, Debug)]
pub enum SetupError {
    /// A worker thread could not be spawned
    #[error("Failed to start worker {id}: {reason}")]
    WorkerSpawn { id: usize, reason: String },

    /// The push subscription could not be established
    #[error("Failed to establish push session with '{broker}': {reason}")]
    PushSession { broker: String, reason: String },

    /// The scheduler was already started
    #[error("Scheduler already started")]
    AlreadyStarted,
}

/// Output sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// Writing to the destination failed; the sink closed itself
    #[error("Failed to write listing line: {0}")]
    Write(#[from] std::io::Error),

    /// The sink was already closed
    #[error("Sink is closed")]
    Closed,
}

/// Push transport and payload errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Could not connect to the broker
    #[error("Failed to connect to broker '{broker}': {reason}")]
    Connect { broker: String, reason: String },

    /// Connected but the subscription was refused
    #[error("Failed to subscribe to '{topic}': {reason}")]
    Subscribe { topic: String, reason: String },

    /// The session dropped while collecting
    #[error("Push session disconnected: {reason}")]
    Disconnected { reason: String },

    /// One inbound message could not be mapped to an entry
    #[error("Malformed push payload: {reason}")]
    Malformed { reason: String },
}

impl PushError {
    /// Check if this error only affects a single message
    pub fn is_per_message(&self) -> bool {
        matches!(self, PushError::Malformed { .. })
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid queue size
    #[error("Invalid queue size {size}: must be at least {min}")]
    InvalidQueueSize { size: usize, min: usize },

    /// A limit that must be positive was zero
    #[error("Invalid {name} limit {value}: must be at least 1")]
    InvalidLimit { name: &'static str, value: usize },

    /// Invalid inclusion pattern
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Invalid push field-extraction rule
    #[error("Invalid field rule '{rule}': {reason}")]
    InvalidFieldRule { rule: String, reason: String },

    /// Push mode was requested without a required setting
    #[error("Push mode requires {0}")]
    MissingPushSetting(&'static str),

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath {
        path: std::path::PathBuf,
        reason: String,
    },
}

/// Result type alias for ListerError
pub type Result<T> = std::result::Result<T, ListerError>;

/// Result type alias for EnumerationError
pub type EnumResult<T> = std::result::Result<T, EnumerationError>;

/// Result type alias for SinkError
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Result type alias for PushError
pub type PushResult<T> = std::result::Result<T, PushError>;

/// Represents the outcome of expanding a single directory
#[derive(Debug)]
pub enum ListOutcome {
    /// Directory enumerated and its children processed
    Success {
        path: String,
        entries: usize,
        subdirs: usize,
    },

    /// Task dropped without enumeration (listing halted)
    Skipped { path: String, reason: String },

    /// Enumeration failed; recorded as an error line
    Failed {
        path: String,
        error: EnumerationError,
    },
}

impl ListOutcome {
    /// Returns true if this outcome represents success
    pub fn is_success(&self) -> bool {
        matches!(self, ListOutcome::Success { .. })
    }

    /// Returns the path associated with this outcome
    pub fn path(&self) -> &str {
        match self {
            ListOutcome::Success { path, .. } => path,
            ListOutcome::Skipped { path, .. } => path,
            ListOutcome::Failed { path, .. } => path,
        }
    }
}
