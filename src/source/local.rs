//! Local filesystem enumerator
//!
//! Lists one directory level with `std::fs`. Used by the CLI and as a
//! reference adapter: it reports real permission strings, uid/gid as
//! owner/group and symlink targets as link hints, so every column of the
//! canonical line is exercised.

use crate::error::{EnumResult, EnumerationError};
use crate::source::{join_path, EntryKind, LinkHint, Metadata, RawEntry, ResourceEnumerator};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::trace;

/// Enumerator backed by the local filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalEnumerator {
    /// Follow symlinks to directories instead of listing them as links
    follow_links: bool,
}

impl LocalEnumerator {
    /// Create an enumerator that lists symlinks as links
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow symlinks when classifying entries
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    fn entry_from_metadata(&self, parent: &str, name: String, path: &Path) -> EnumResult<RawEntry> {
        let display = join_path(parent, &name);
        let meta = if self.follow_links {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
        .map_err(|e| EnumerationError::from_io(&display, &e))?;

        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        let mut entry = RawEntry::new(parent, name, kind)
            .with_size(meta.len())
            .with_mtime(mtime_millis(&meta));

        if let Some((mode, uid, gid)) = unix_attrs(&meta) {
            entry = entry
                .with_permissions(permission_string(mode))
                .with_owner(uid.to_string(), gid.to_string());
        }

        if kind == EntryKind::Symlink {
            if let Ok(target) = fs::read_link(path) {
                entry = entry.with_link(LinkHint::Target(target.to_string_lossy().into_owned()));
            }
        }

        Ok(entry)
    }
}

impl ResourceEnumerator for LocalEnumerator {
    fn enumerate(&self, directory: &str) -> EnumResult<Vec<RawEntry>> {
        let dir = if directory.is_empty() { "." } else { directory };
        let read_dir = fs::read_dir(dir).map_err(|e| EnumerationError::from_io(directory, &e))?;

        let mut entries = Vec::new();
        for item in read_dir {
            let item = item.map_err(|e| EnumerationError::from_io(directory, &e))?;
            let name = item.file_name().to_string_lossy().into_owned();

            match self.entry_from_metadata(directory, name, &item.path()) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // Vanished between readdir and stat; hand it over for probing
                    trace!(directory = directory, error = %e, "Entry metadata unavailable");
                    let mut entry = RawEntry::new(
                        directory,
                        item.file_name().to_string_lossy().into_owned(),
                        EntryKind::Unknown,
                    );
                    entry.size = None;
                    entries.push(entry);
                }
            }
        }

        Ok(entries)
    }

    fn probe(&self, path: &str) -> EnumResult<Metadata> {
        let entry = self.entry_from_metadata("", path.to_string(), Path::new(path))?;
        Ok(Metadata {
            size: entry.size,
            mtime: entry.mtime,
            kind: entry.kind,
            permissions: entry.permissions,
            link: entry.link,
        })
    }
}

fn mtime_millis(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn unix_attrs(meta: &fs::Metadata) -> Option<(u32, u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.mode(), meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn unix_attrs(_meta: &fs::Metadata) -> Option<(u32, u32, u32)> {
    None
}

/// Render Unix mode bits as a 10-character permission string
pub fn permission_string(mode: u32) -> String {
    let type_char = match mode & 0o170000 {
        0o040000 => 'd', // S_IFDIR
        0o120000 => 'l', // S_IFLNK
        0o060000 => 'b', // S_IFBLK
        0o020000 => 'c', // S_IFCHR
        0o010000 => 'p', // S_IFIFO
        0o140000 => 's', // S_IFSOCK
        _ => '-',
    };

    let mut out = String::with_capacity(10);
    out.push(type_char);

    const BITS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    for (bit, ch) in BITS {
        out.push(if mode & bit != 0 { ch } else { '-' });
    }

    out
}
