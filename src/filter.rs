//! Dedup and inclusion filtering
//!
//! [`SeenSet`] remembers every path committed during one listing call; the
//! test-and-insert is a single atomic step so two workers racing on the same
//! path cannot both win. [`Pattern`] holds either a regular expression (file
//! and path matching) or a glob (bucket/container style names). The two
//! kinds are kept apart: each source picks the one its callers expect.

use crate::error::ConfigError;
use dashmap::DashSet;
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

/// Paths already accepted during one listing call
#[derive(Debug, Default)]
pub struct SeenSet {
    seen: DashSet<String>,
}

impl SeenSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `path` if it has not been seen before
    ///
    /// Returns `true` only for the first call with a given path.
    pub fn accept(&self, path: &str) -> bool {
        if self.seen.contains(path) {
            return false;
        }
        self.seen.insert(path.to_string())
    }

    /// Check without committing
    pub fn contains(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    /// Number of committed paths
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if nothing was committed yet
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Which matching language a pattern uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    /// Regular expression matched against the whole candidate
    #[default]
    Regex,
    /// Shell-style wildcard (`*`, `?`, `[..]`)
    Glob,
}

/// A compiled inclusion pattern
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Everything matches
    Any,
    /// Anchored regular expression
    Regex(Regex),
    /// Glob matcher
    Glob(GlobMatcher),
}

impl Pattern {
    /// Compile `pattern` as `kind`; an empty pattern matches everything
    pub fn compile(pattern: &str, kind: FilterKind) -> Result<Self, ConfigError> {
        if pattern.is_empty() {
            return Ok(Pattern::Any);
        }

        match kind {
            FilterKind::Regex => Regex::new(&format!("^(?:{})$", pattern))
                .map(Pattern::Regex)
                .map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                }),
            FilterKind::Glob => GlobBuilder::new(pattern)
                .literal_separator(false)
                .build()
                .map(|glob| Pattern::Glob(glob.compile_matcher()))
                .map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Check if `candidate` is included
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Regex(re) => re.is_match(candidate),
            Pattern::Glob(glob) => glob.is_match(candidate),
        }
    }

    /// Check if this pattern accepts everything
    pub fn is_any(&self) -> bool {
        matches!(self, Pattern::Any)
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::Any
    }
}

/// Compile and apply a pattern in one step
pub fn matches(pattern: &str, kind: FilterKind, candidate: &str) -> Result<bool, ConfigError> {
    Ok(Pattern::compile(pattern, kind)?.matches(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_seen_set_accepts_once() {
        let seen = SeenSet::new();
        assert!(seen.accept("/a/f1"));
        assert!(!seen.accept("/a/f1"));
        assert!(seen.accept("/a/f2"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_seen_set_concurrent() {
        let seen = Arc::new(SeenSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = Arc::clone(&seen);
                thread::spawn(move || (0..1000).filter(|i| seen.accept(&format!("/p/{}", i))).count())
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_regex_is_anchored() {
        let p = Pattern::compile(r".*\.grib", FilterKind::Regex).unwrap();
        assert!(p.matches("sub/data.grib"));
        assert!(!p.matches("sub/data.grib.idx"));

        let p = Pattern::compile("data", FilterKind::Regex).unwrap();
        assert!(!p.matches("mydata"));
    }

    #[test]
    fn test_glob_and_regex_differ() {
        // `*` means "anything" in a glob but "repeat" in a regex
        assert!(matches("*.grib", FilterKind::Glob, "a/b.grib").unwrap());
        assert!(matches("*.grib", FilterKind::Regex, "a/b.grib").is_err());
        assert!(matches("file?.txt", FilterKind::Glob, "file1.txt").unwrap());
        assert!(!matches("file?.txt", FilterKind::Regex, "file1.txt").unwrap());
    }

    #[test]
    fn test_empty_pattern_matches_all() {
        let p = Pattern::compile("", FilterKind::Glob).unwrap();
        assert!(p.is_any());
        assert!(p.matches("anything"));
    }
}
