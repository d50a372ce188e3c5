//! Resource enumeration
//!
//! A [`ResourceEnumerator`] lists the direct children of one directory (or
//! object-store prefix) and, when asked, probes the metadata of one entry.
//! Every protocol adapter maps its own entry shape (object summaries, blob
//! items, SFTP records, HTML links, broker messages) onto [`RawEntry`] so the
//! rest of the engine never sees a protocol-specific type.
//!
//! ```text
//! ┌──────────────────┐   enumerate(dir)   ┌──────────────┐
//! │ ResourceEnumerator├──────────────────►│  Vec<RawEntry>│
//! │  (per protocol)   │   probe(path)     │  Metadata     │
//! └──────────────────┘──────────────────►└──────────────┘
//! ```

pub mod local;

use crate::error::{EnumResult, EnumerationError};

pub use local::LocalEnumerator;

/// Directory state of an entry as reported by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file (or anything that is listed as a leaf)
    File,
    /// Directory or prefix that can be enumerated
    Directory,
    /// Symbolic reference to another entry
    Symlink,
    /// The source could not tell; the normalizer decides
    Unknown,
}

impl EntryKind {
    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        *self == EntryKind::Directory
    }

    /// Check if the kind is still undecided
    pub fn is_unknown(&self) -> bool {
        *self == EntryKind::Unknown
    }
}

/// Where a raw entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Returned by a directory enumeration
    Enumerated,
    /// Completed by a metadata probe
    Probed,
    /// Delivered by a push subscription
    Pushed,
}

/// Protocol-specific hint about the target of a symbolic reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkHint {
    /// The target name is known
    Target(String),
    /// Raw value of a `Content-Disposition` style header
    ContentDisposition(String),
}

/// A child reference as produced by an enumerator or the push adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Entry name; may itself be an absolute path or URL
    pub name: String,

    /// Parent directory the entry was listed in (empty for absolute names)
    pub parent: String,

    /// Size in bytes, if the listing already carried it
    pub size: Option<u64>,

    /// Modification time in epoch milliseconds, if known
    pub mtime: Option<i64>,

    /// Directory state
    pub kind: EntryKind,

    /// Origin of this entry
    pub source: SourceKind,

    /// Permission string reported by the source (e.g. `drwxr-xr-x`)
    pub permissions: Option<String>,

    /// Owner reported by the source
    pub owner: Option<String>,

    /// Group reported by the source
    pub group: Option<String>,

    /// Target hint for symbolic references
    pub link: Option<LinkHint>,
}

impl RawEntry {
    /// Create an enumerated entry with unknown metadata
    pub fn new(parent: impl Into<String>, name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            size: None,
            mtime: None,
            kind,
            source: SourceKind::Enumerated,
            permissions: None,
            owner: None,
            group: None,
            link: None,
        }
    }

    /// Create a regular file entry
    pub fn file(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(parent, name, EntryKind::File)
    }

    /// Create a directory entry
    pub fn dir(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(parent, name, EntryKind::Directory)
    }

    /// Attach a known size
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Attach a known modification time (epoch millis)
    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Attach owner and group
    pub fn with_owner(mut self, owner: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self.group = Some(group.into());
        self
    }

    /// Attach a permission string
    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = Some(permissions.into());
        self
    }

    /// Attach a symlink target hint
    pub fn with_link(mut self, link: LinkHint) -> Self {
        self.link = Some(link);
        self
    }

    /// Mark the origin of this entry
    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.source = source;
        self
    }

    /// Full path of the entry (parent joined with name)
    pub fn full_path(&self) -> String {
        join_path(&self.parent, &self.name)
    }

    /// Check if size and mtime are already known (no probe needed)
    pub fn has_metadata(&self) -> bool {
        self.size.is_some() && self.mtime.is_some()
    }

    /// Check for `.` and `..` self references
    pub fn is_special(&self) -> bool {
        let name = self.name.trim_end_matches('/');
        name == "." || name == ".."
    }

    /// Merge the result of a metadata probe into this entry
    pub fn apply_probe(&mut self, metadata: Metadata) {
        if metadata.size.is_some() {
            self.size = metadata.size;
        }
        if metadata.mtime.is_some() {
            self.mtime = metadata.mtime;
        }
        if self.kind.is_unknown() {
            self.kind = metadata.kind;
        }
        if metadata.link.is_some() {
            self.link = metadata.link;
        }
        if metadata.permissions.is_some() {
            self.permissions = metadata.permissions;
        }
        self.source = SourceKind::Probed;
    }
}

/// Result of probing a single entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Size in bytes; `None` when the source did not report one
    pub size: Option<u64>,
    /// Modification time in epoch milliseconds
    pub mtime: Option<i64>,
    /// What the probe learned about the entry
    pub kind: EntryKind,
    /// Permission string, if the protocol reports one
    pub permissions: Option<String>,
    /// Symlink target hint
    pub link: Option<LinkHint>,
}

impl Default for EntryKind {
    fn default() -> Self {
        EntryKind::Unknown
    }
}

/// Lists one directory level and probes single entries
///
/// Implementations must be shareable between worker threads. They must not
/// drop entries across pages; duplicates are fine and are removed downstream.
pub trait ResourceEnumerator: Send + Sync {
    /// List the direct children of `directory`
    fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>>;

    /// Fetch the metadata of one entry
    fn probe(&self, path: &str) -> EnumResult<Metadata> {
        Err(EnumerationError::protocol(
            path,
            "metadata probe not supported by this source",
        ))
    }
}

impl<T: ResourceEnumerator + ?Sized> ResourceEnumerator for std::sync::Arc<T> {
    fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>> {
        (**self).enumerate(directory)
    }

    fn probe(&self, path: &str) -> EnumResult<Metadata> {
        (**self).probe(path)
    }
}

/// One page of a paginated listing
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Entries on this page
    pub entries: Vec<RawEntry>,
    /// Token for the next page; `None` on the last page
    pub next: Option<String>,
}

/// A source that returns listings page by page (object stores, blob containers)
pub trait PagedEnumerator: Send + Sync {
    /// Fetch one page of `directory`, starting at `token`
    fn page(&self, directory: &str, token: Option<&str>) -> EnumResult<Page>;

    /// Fetch the metadata of one entry
    fn probe(&self, path: &str) -> EnumResult<Metadata> {
        Err(EnumerationError::protocol(
            path,
            "metadata probe not supported by this source",
        ))
    }
}

/// Adapts a [`PagedEnumerator`] into a [`ResourceEnumerator`] by merging pages
pub struct Paginated<P> {
    inner: P,
    max_pages: usize,
}

/// Upper bound on pages merged for one directory
const DEFAULT_MAX_PAGES: usize = 100_000;

impl<P: PagedEnumerator> Paginated<P> {
    /// Wrap a paged source
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Limit the number of pages fetched per directory
    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Access the wrapped source
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: PagedEnumerator> ResourceEnumerator for Paginated<P> {
    fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>> {
        let mut entries = Vec::new();
        let mut token: Option<String> = None;

        for page_no in 0..self.max_pages {
            let page = self.inner.page(directory, token.as_deref())?;
            entries.extend(page.entries);

            match page.next {
                // A source repeating its own token would loop forever
                Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
                Some(_) => {
                    return Err(EnumerationError::protocol(
                        directory,
                        format!("continuation token repeated on page {}", page_no + 1),
                    ))
                }
                None => return Ok(entries),
            }
        }

        tracing::warn!(
            directory = directory,
            pages = self.max_pages,
            "Page limit reached, listing truncated"
        );
        Ok(entries)
    }

    fn probe(&self, path: &str) -> EnumResult<Metadata> {
        self.inner.probe(path)
    }
}

/// Check if a name is a full URL
pub fn is_url(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Join a directory and a child name
///
/// Absolute names and URLs are returned unchanged; an empty directory yields
/// the name itself.
pub fn join_path(directory: &str, name: &str) -> String {
    if directory.is_empty() || is_url(name) || name.starts_with('/') {
        return name.to_string();
    }
    if directory == name {
        return name.to_string();
    }
    if directory.ends_with('/') {
        format!("{}{}", directory, name)
    } else {
        format!("{}/{}", directory, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/a", "f1"), "/a/f1");
        assert_eq!(join_path("/a/", "f1"), "/a/f1");
        assert_eq!(join_path("", "f1"), "f1");
        assert_eq!(join_path("/a", "/x/y"), "/x/y");
        assert_eq!(join_path("/a", "https://host/x"), "https://host/x");
    }

    #[test]
    fn test_special_entries() {
        assert!(RawEntry::dir("/a", ".").is_special());
        assert!(RawEntry::dir("/a", "../").is_special());
        assert!(!RawEntry::file("/a", "..data").is_special());
    }

    #[test]
    fn test_apply_probe_keeps_known_kind() {
        let mut entry = RawEntry::file("/a", "f1");
        entry.apply_probe(Metadata {
            size: Some(10),
            mtime: Some(1_000),
            kind: EntryKind::Directory,
            ..Default::default()
        });

        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, Some(10));
        assert_eq!(entry.source, SourceKind::Probed);
        assert!(entry.has_metadata());
    }

    struct TwoPages {
        calls: AtomicUsize,
    }

    impl PagedEnumerator for TwoPages {
        fn page(&self, directory: &str, token: Option<&str>) -> EnumResult<Page> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match token {
                None => Ok(Page {
                    entries: vec![RawEntry::file(directory, "a"), RawEntry::file(directory, "b")],
                    next: Some("p2".into()),
                }),
                Some("p2") => Ok(Page {
                    entries: vec![RawEntry::file(directory, "b"), RawEntry::file(directory, "c")],
                    next: None,
                }),
                Some(other) => Err(EnumerationError::protocol(directory, other)),
            }
        }
    }

    #[test]
    fn test_paginated_merges_pages() {
        let source = Paginated::new(TwoPages {
            calls: AtomicUsize::new(0),
        });
        let entries = source.enumerate("/bucket").unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "b", "c"]);
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 2);
    }

    struct Looping;

    impl PagedEnumerator for Looping {
        fn page(&self, _directory: &str, _token: Option<&str>) -> EnumResult<Page> {
            Ok(Page {
                entries: vec![],
                next: Some("same".into()),
            })
        }
    }

    #[test]
    fn test_paginated_rejects_repeated_token() {
        let source = Paginated::new(Looping);
        assert!(matches!(
            source.enumerate("/bucket"),
            Err(EnumerationError::Protocol { .. })
        ));
    }
}
