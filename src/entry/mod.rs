//! Entry normalization
//!
//! Turns a [`RawEntry`] (plus an optional probe result) into a
//! [`NormalizedEntry`]: the permission/owner/group/size/mtime/name tuple
//! rendered as one canonical listing line. Probe failures never escape this
//! module; they become entries carrying an error message.

pub mod format;

use crate::error::{EnumResult, EnumerationError};
use crate::source::{EntryKind, LinkHint, Metadata, RawEntry};
use chrono::Utc;

pub use format::{canonical_line, format_timestamp, name_column, sort_lines};

/// Default owner column
pub const DEFAULT_OWNER: &str = "nouser";

/// Default group column
pub const DEFAULT_GROUP: &str = "nogroup";

/// Placeholder permissions per entry kind
pub const DIR_PERMISSIONS: &str = "drw-r--r--";
pub const FILE_PERMISSIONS: &str = "-rw-r--r--";
pub const LINK_PERMISSIONS: &str = "lrwxrwxrwx";
pub const ERROR_PERMISSIONS: &str = "?rw-r--r--";

/// Placeholder sizes for entries without a meaningful byte count
pub const DIR_SIZE: u64 = 1024;
pub const LINK_SIZE: u64 = 1;

/// What to do with a symbolic reference whose target cannot be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymlinkPolicy {
    /// Record an error entry
    Fail,
    /// Emit an `l` line without a target
    #[default]
    MarkUnresolved,
}

/// A fully normalized listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEntry {
    /// 10-character permission string
    pub permissions: String,

    /// Owner column
    pub owner: String,

    /// Group column
    pub group: String,

    /// Size column; `None` renders as `?`
    pub size: Option<u64>,

    /// Modification time in epoch milliseconds
    pub mtime: i64,

    /// Display path (relative to the listing root)
    pub name: String,

    /// Resolved kind
    pub kind: EntryKind,

    /// Symlink target, if resolved
    pub target: Option<String>,

    /// Error message for entries that could not be read
    pub error: Option<String>,
}

impl NormalizedEntry {
    /// Check if this entry records a failure
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Bytes this entry contributes to listing totals
    pub fn listed_bytes(&self) -> u64 {
        match (self.kind, self.size) {
            (EntryKind::File, Some(size)) if !self.is_error() => size,
            _ => 0,
        }
    }

    /// Render the canonical listing line
    pub fn to_line(&self) -> String {
        canonical_line(self, Utc::now())
    }
}

/// Converts raw entries into normalized ones for one listing call
#[derive(Debug, Clone)]
pub struct Normalizer {
    root: String,
    owner: String,
    group: String,
    symlink_policy: SymlinkPolicy,
}

impl Normalizer {
    /// Create a normalizer for a listing rooted at `root`
    pub fn new(root: &str) -> Self {
        Self {
            root: trim_separator(root).to_string(),
            owner: DEFAULT_OWNER.to_string(),
            group: DEFAULT_GROUP.to_string(),
            symlink_policy: SymlinkPolicy::default(),
        }
    }

    /// Set the owner/group used when the source does not report them
    pub fn with_owner(mut self, owner: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = owner.into();
        self.group = group.into();
        self
    }

    /// Set the policy for unresolved symbolic references
    pub fn with_symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.symlink_policy = policy;
        self
    }

    /// Listing root without a trailing separator
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Path of an entry relative to the listing root
    pub fn display_name(&self, full_path: &str) -> String {
        if self.root.is_empty() {
            return full_path.trim_start_matches('/').to_string();
        }
        match full_path.strip_prefix(&self.root) {
            Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
            _ => full_path.to_string(),
        }
    }

    /// Check if `full_path` is the listing root or one of its ancestors
    ///
    /// HTML index pages link back to their parents; following those would
    /// list the hierarchy above the root.
    pub fn is_self_reference(&self, full_path: &str) -> bool {
        let path = trim_separator(full_path);
        if path == self.root {
            return true;
        }
        if path.is_empty() {
            return self.root.starts_with('/');
        }
        self.root.starts_with(path) && self.root[path.len()..].starts_with('/')
    }

    /// Decide the kind of an entry the source could not classify
    ///
    /// Without a size, a trailing separator means a directory and anything
    /// else is a symbolic reference.
    pub fn classify(raw: &RawEntry) -> EntryKind {
        match raw.kind {
            EntryKind::Unknown if raw.size.is_none() => {
                if raw.name.ends_with('/') {
                    EntryKind::Directory
                } else {
                    EntryKind::Symlink
                }
            }
            EntryKind::Unknown => EntryKind::File,
            kind => kind,
        }
    }

    /// Normalize one entry
    ///
    /// `probe` is the result of a metadata probe, if one was made. A failed
    /// probe yields an error entry instead of an `Err`.
    pub fn normalize(&self, mut raw: RawEntry, probe: Option<EnumResult<Metadata>>) -> NormalizedEntry {
        match probe {
            Some(Ok(metadata)) => raw.apply_probe(metadata),
            Some(Err(e)) => return self.error_entry(&raw.full_path(), &e.to_string()),
            None => {}
        }

        let kind = Self::classify(&raw);
        let name = self.display_name(&raw.full_path());
        let owner = raw.owner.take().unwrap_or_else(|| self.owner.clone());
        let group = raw.group.take().unwrap_or_else(|| self.group.clone());
        let mtime = raw.mtime.unwrap_or_else(|| Utc::now().timestamp_millis());

        let (default_permissions, size) = match kind {
            EntryKind::Directory => (DIR_PERMISSIONS, Some(DIR_SIZE)),
            EntryKind::Symlink => (LINK_PERMISSIONS, Some(raw.size.unwrap_or(LINK_SIZE))),
            _ => (FILE_PERMISSIONS, Some(raw.size.unwrap_or(0))),
        };

        let target = if kind == EntryKind::Symlink {
            let target = raw.link.as_ref().and_then(resolve_link);
            if target.is_none() && self.symlink_policy == SymlinkPolicy::Fail {
                return self.error_entry(&raw.full_path(), "no target found for symbolic reference");
            }
            target
        } else {
            None
        };

        NormalizedEntry {
            permissions: raw
                .permissions
                .filter(|p| p.len() == 10)
                .unwrap_or_else(|| default_permissions.to_string()),
            owner,
            group,
            size,
            mtime,
            name,
            kind,
            target,
            error: None,
        }
    }

    /// Build the entry recorded for an unreadable path
    pub fn error_entry(&self, full_path: &str, message: &str) -> NormalizedEntry {
        NormalizedEntry {
            permissions: ERROR_PERMISSIONS.to_string(),
            owner: self.owner.clone(),
            group: self.group.clone(),
            size: None,
            mtime: Utc::now().timestamp_millis(),
            name: self.display_name(full_path),
            kind: EntryKind::Unknown,
            target: None,
            error: Some(message.to_string()),
        }
    }

    /// Build the entry recorded for a failed enumeration or probe
    pub fn failure(&self, full_path: &str, error: &EnumerationError) -> NormalizedEntry {
        self.error_entry(full_path, &error.to_string())
    }
}

fn trim_separator(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else if path == "/" {
        ""
    } else {
        path
    }
}

/// Resolve a symlink target from a protocol hint
pub fn resolve_link(hint: &LinkHint) -> Option<String> {
    match hint {
        LinkHint::Target(target) if !target.is_empty() => Some(target.clone()),
        LinkHint::Target(_) => None,
        LinkHint::ContentDisposition(header) => content_disposition_filename(header),
    }
}

/// Extract the file name from a `Content-Disposition` header value
///
/// Uses the `filename=` parameter when present, otherwise the whole value.
/// The name is unquoted, percent-decoded and spaces become `+`.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    let raw = match header.split_once("filename=") {
        Some((_, value)) => value.replace('"', ""),
        None => header.to_string(),
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Some(percent_decode(raw).replace(' ', "+"))
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
