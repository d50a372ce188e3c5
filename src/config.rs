//! Configuration types for remote-walker
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The validated, immutable [`ListingRequest`] of one listing call
//! - Runtime configuration of the command-line tool

use crate::entry::{Normalizer, SymlinkPolicy, DEFAULT_GROUP, DEFAULT_OWNER};
use crate::error::ConfigError;
use crate::filter::{FilterKind, Pattern};
use crate::push::{ConnectPolicy, FieldRules, PushConfig, DEFAULT_CONNECT_ATTEMPTS};
use crate::walker::Limits;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum reasonable worker count
pub const MAX_WORKERS: usize = 512;

/// Minimum queue size
const MIN_QUEUE_SIZE: usize = 1;

/// Library defaults
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_QUEUE_SIZE: usize = 100;
pub const DEFAULT_MAX_DEPTH: usize = 50_000;
pub const DEFAULT_MAX_ENTRIES: usize = 500_000;
pub const DEFAULT_MAX_DIRECTORIES: usize = 50_000;

/// Concurrent recursive listing of remote file hierarchies
#[derive(Parser, Debug, Clone)]
#[command(
    name = "remote-walker",
    version,
    about = "Concurrent recursive listing of file hierarchies",
    long_about = "Lists a directory tree with a bounded pool of workers and prints one canonical\n\
                  'ls -l' style line per entry. Unreadable entries are listed in-line as 'err:' lines.\n\n\
                  In push mode, entries are collected from pub/sub notifications for a bounded\n\
                  window instead of being enumerated.",
    after_help = "EXAMPLES:\n    \
        remote-walker /data/archive -w 16\n    \
        remote-walker /data/archive --pattern '.*\\.grib2' -d 3 --sort --collect\n    \
        remote-walker /data/archive --glob --pattern '*.nc' -o listing.txt\n    \
        remote-walker /x --push --broker redis://localhost:6379 --wait 30 --max-messages 500"
)]
pub struct CliArgs {
    /// Directory to list
    #[arg(value_name = "ROOT")]
    pub root: String,

    /// Inclusion pattern applied to paths relative to ROOT (regex by default)
    #[arg(long, value_name = "PATTERN", default_value = "")]
    pub pattern: String,

    /// Interpret --pattern as a glob instead of a regex
    #[arg(long)]
    pub glob: bool,

    /// Maximum recursion depth
    #[arg(short = 'd', long, default_value_t = DEFAULT_MAX_DEPTH, value_name = "NUM")]
    pub max_depth: usize,

    /// Maximum number of listed entries
    #[arg(long, default_value_t = DEFAULT_MAX_ENTRIES, value_name = "NUM")]
    pub max_entries: usize,

    /// Maximum number of directories visited
    #[arg(long = "max-dirs", default_value_t = DEFAULT_MAX_DIRECTORIES, value_name = "NUM")]
    pub max_dirs: usize,

    /// Number of worker threads
    #[arg(
        short = 'w',
        long,
        default_value_t = default_workers(),
        value_name = "NUM"
    )]
    pub workers: usize,

    /// Work queue size (directory tasks waiting for a worker)
    #[arg(long, default_value_t = DEFAULT_QUEUE_SIZE, value_name = "NUM")]
    pub queue_size: usize,

    /// Owner shown when the source does not report one
    #[arg(long, default_value = DEFAULT_OWNER)]
    pub owner: String,

    /// Group shown when the source does not report one
    #[arg(long, default_value = DEFAULT_GROUP)]
    pub group: String,

    /// Report symbolic links without a target as errors
    #[arg(long)]
    pub fail_on_unresolved_symlink: bool,

    /// Follow symbolic links when reading local metadata
    #[arg(long)]
    pub follow_links: bool,

    /// Sort lines by name (implies --collect)
    #[arg(long)]
    pub sort: bool,

    /// Write the listing to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Collect the whole listing before printing it
    #[arg(long)]
    pub collect: bool,

    /// Write the listing report as JSON to FILE
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Collect entries from push notifications instead of enumerating ROOT
    #[arg(long)]
    pub push: bool,

    /// Push broker URL (e.g. redis://host:6379)
    #[arg(long, value_name = "URL")]
    pub broker: Option<String>,

    /// Topic to subscribe to (derived from ROOT when unset)
    #[arg(long, value_name = "TOPIC")]
    pub topic: Option<String>,

    /// Collection window in seconds
    #[arg(long, default_value = "60", value_name = "SECS")]
    pub wait: u64,

    /// Stop collecting after this many messages
    #[arg(long, default_value = "1000000", value_name = "NUM")]
    pub max_messages: usize,

    /// Rule producing the entry path from a message
    #[arg(long, default_value = "${payload.href}", value_name = "RULE")]
    pub href: String,

    /// Rule producing the size in bytes
    #[arg(long, default_value = "${payload.size}", value_name = "RULE")]
    pub size_field: String,

    /// Rule producing the modification time (epoch millis)
    #[arg(long, default_value = "${payload.time}", value_name = "RULE")]
    pub time_field: String,

    /// Rule producing an alternative name (lists the entry as a link)
    #[arg(long, value_name = "RULE")]
    pub name_field: Option<String>,

    /// Client identifier for the push session
    #[arg(long, value_name = "ID")]
    pub client_id: Option<String>,

    /// Number of connection attempts for the push session
    #[arg(long, default_value_t = DEFAULT_CONNECT_ATTEMPTS, value_name = "NUM")]
    pub retries: u32,
}

fn default_workers() -> usize {
    // Listing is I/O bound; default to 2x CPU cores
    (num_cpus::get() * 2).clamp(1, MAX_WORKERS)
}

/// One listing call
///
/// Immutable once handed to [`crate::Lister`].
#[derive(Debug, Clone)]
pub struct ListingRequest {
    /// Root path or URI
    pub root: String,

    /// Inclusion pattern; empty includes everything
    pub pattern: String,

    /// How `pattern` is interpreted
    pub filter_kind: FilterKind,

    /// Maximum recursion depth (root is level 0)
    pub max_depth: usize,

    /// Maximum emitted lines
    pub max_entries: usize,

    /// Maximum directory tasks, root included
    pub max_directories: usize,

    /// Worker pool size
    pub workers: usize,

    /// Task queue capacity
    pub queue_size: usize,

    /// Owner shown when the source reports none
    pub owner: String,

    /// Group shown when the source reports none
    pub group: String,

    /// Unresolved symlink handling
    pub symlink_policy: SymlinkPolicy,

    /// Sort batch results by name
    pub sort_by_name: bool,

    /// Push-mode settings
    pub push: Option<PushConfig>,
}

impl ListingRequest {
    /// Request with default limits for `root`
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            pattern: String::new(),
            filter_kind: FilterKind::Regex,
            max_depth: DEFAULT_MAX_DEPTH,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_directories: DEFAULT_MAX_DIRECTORIES,
            workers: DEFAULT_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            owner: DEFAULT_OWNER.to_string(),
            group: DEFAULT_GROUP.to_string(),
            symlink_policy: SymlinkPolicy::default(),
            sort_by_name: false,
            push: None,
        }
    }

    /// Set the inclusion pattern and its kind
    pub fn pattern(mut self, pattern: impl Into<String>, kind: FilterKind) -> Self {
        self.pattern = pattern.into();
        self.filter_kind = kind;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    pub fn max_directories(mut self, directories: usize) -> Self {
        self.max_directories = directories;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.symlink_policy = policy;
        self
    }

    pub fn sort_by_name(mut self, sort: bool) -> Self {
        self.sort_by_name = sort;
        self
    }

    /// Collect entries from a push session instead of enumerating the root
    pub fn push(mut self, push: PushConfig) -> Self {
        self.push = Some(push);
        self
    }

    /// Check the request limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: self.workers,
                max: MAX_WORKERS,
            });
        }

        if self.queue_size < MIN_QUEUE_SIZE {
            return Err(ConfigError::InvalidQueueSize {
                size: self.queue_size,
                min: MIN_QUEUE_SIZE,
            });
        }

        for (name, value) in [
            ("depth", self.max_depth),
            ("entry", self.max_entries),
            ("directory", self.max_directories),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidLimit { name, value });
            }
        }

        if let Some(push) = &self.push {
            if push.max_messages == 0 {
                return Err(ConfigError::InvalidLimit {
                    name: "message",
                    value: 0,
                });
            }
        }

        Ok(())
    }

    /// Compile the inclusion pattern
    pub fn compile_pattern(&self) -> Result<Pattern, ConfigError> {
        Pattern::compile(&self.pattern, self.filter_kind)
    }

    /// Normalizer configured for this request
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(&self.root)
            .with_owner(self.owner.clone(), self.group.clone())
            .with_symlink_policy(self.symlink_policy)
    }

    /// Truncation limits of this request
    pub fn limits(&self) -> Limits {
        Limits {
            max_depth: self.max_depth,
            max_entries: self.max_entries,
            max_directories: self.max_directories,
        }
    }

    /// Build and validate a request from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let kind = if args.glob {
            FilterKind::Glob
        } else {
            FilterKind::Regex
        };

        let mut request = ListingRequest::new(args.root.clone())
            .pattern(args.pattern.clone(), kind)
            .max_depth(args.max_depth)
            .max_entries(args.max_entries)
            .max_directories(args.max_dirs)
            .workers(args.workers)
            .queue_size(args.queue_size)
            .owner(args.owner.clone())
            .group(args.group.clone())
            .symlink_policy(if args.fail_on_unresolved_symlink {
                SymlinkPolicy::Fail
            } else {
                SymlinkPolicy::MarkUnresolved
            })
            .sort_by_name(args.sort);

        if args.push {
            request = request.push(push_config(args)?);
        }

        request.validate()?;
        // Surface pattern errors before any work starts
        request.compile_pattern()?;

        Ok(request)
    }
}

fn push_config(args: &CliArgs) -> Result<PushConfig, ConfigError> {
    let mut rules = FieldRules::new(&args.href)?;
    if !args.size_field.is_empty() {
        rules = rules.size(&args.size_field)?;
    }
    if !args.time_field.is_empty() {
        rules = rules.time(&args.time_field)?;
    }
    if let Some(name) = &args.name_field {
        rules = rules.alternative_name(name)?;
    }

    let mut config = PushConfig::new(rules)
        .wait(Duration::from_secs(args.wait))
        .max_messages(args.max_messages)
        .connect_policy(ConnectPolicy {
            attempts: args.retries.max(1),
            ..ConnectPolicy::default()
        });
    if let Some(topic) = &args.topic {
        config = config.topic(topic.clone());
    }
    if let Some(id) = &args.client_id {
        config = config.client_id(id.clone());
    }

    Ok(config)
}

/// Validated configuration of the command-line tool
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// The listing call
    pub request: ListingRequest,

    /// Output file; stdout when unset
    pub output_path: Option<PathBuf>,

    /// JSON report destination
    pub report_path: Option<PathBuf>,

    /// Collect before printing
    pub collect: bool,

    /// Follow symlinks in the local enumerator
    pub follow_links: bool,

    /// Push broker URL
    pub broker: Option<String>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl RunConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let request = ListingRequest::from_args(&args)?;

        if args.push && args.broker.is_none() {
            return Err(ConfigError::MissingPushSetting("--broker"));
        }

        for path in [&args.output, &args.report].into_iter().flatten() {
            validate_output_path(path)?;
        }

        Ok(Self {
            request,
            output_path: args.output,
            report_path: args.report,
            collect: args.collect || args.sort,
            follow_links: args.follow_links,
            broker: args.broker,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }
}

fn validate_output_path(path: &PathBuf) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(ConfigError::InvalidOutputPath {
                path: path.clone(),
                reason: format!("Parent directory '{}' does not exist", parent.display()),
            });
        }
    }
    Ok(())
}
