//! Canonical listing line
//!
//! ```text
//! PPPPPPPPPP    1 OOOOOOOO GGGGGGGG SSSSSSSSSS MMM dd HH:mm NAME
//! ```
//!
//! Error entries are wrapped as `err:<line> (exception: <message>)`.

use super::NormalizedEntry;
use chrono::{DateTime, Datelike, Utc};
use std::cmp::Ordering;

/// Width of the size column before it widens
const SIZE_WIDTH: usize = 10;

/// Width of the owner and group columns
const ID_WIDTH: usize = 8;

/// Width of the timestamp column
const TIME_WIDTH: usize = 12;

/// Render an entry as one canonical listing line
///
/// `now` decides whether the timestamp shows the time of day (same year) or
/// the year.
pub fn canonical_line(entry: &NormalizedEntry, now: DateTime<Utc>) -> String {
    let size = match entry.size {
        Some(size) => size.to_string(),
        None => "?".to_string(),
    };

    let mut name = entry.name.clone();
    if let Some(target) = &entry.target {
        name.push_str(" -> ");
        name.push_str(target);
    }

    let line = format!(
        "{}    1 {:<owner_w$} {:<group_w$} {:>size_w$} {:<time_w$} {}",
        entry.permissions,
        truncate(&entry.owner, ID_WIDTH),
        truncate(&entry.group, ID_WIDTH),
        size,
        format_timestamp(entry.mtime, now),
        name,
        owner_w = ID_WIDTH,
        group_w = ID_WIDTH,
        size_w = SIZE_WIDTH,
        time_w = TIME_WIDTH,
    );

    match &entry.error {
        Some(message) => format!("err:{} (exception: {})", line, message),
        None => line,
    }
}

/// Render an epoch-millisecond timestamp for the listing
///
/// `MMM dd HH:mm` within the year of `now`, `MMM dd yyyy` otherwise, `-`
/// for non-positive values.
pub fn format_timestamp(mtime: i64, now: DateTime<Utc>) -> String {
    if mtime <= 0 {
        return "-".to_string();
    }
    match DateTime::<Utc>::from_timestamp_millis(mtime) {
        Some(time) if time.year() == now.year() => time.format("%b %d %H:%M").to_string(),
        Some(time) => time.format("%b %d %Y").to_string(),
        None => "-".to_string(),
    }
}

fn truncate(value: &str, width: usize) -> &str {
    match value.char_indices().nth(width) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Extract the name column of a canonical line
///
/// Returns the whole line if it does not have the expected columns.
pub fn name_column(line: &str) -> &str {
    let mut rest = line;

    // permissions, link count, owner, group, size
    for _ in 0..5 {
        rest = match skip_field(rest) {
            Some(r) => r,
            None => return line,
        };
    }

    let time_fields = if rest.trim_start().starts_with('-') { 1 } else { 3 };
    for _ in 0..time_fields {
        rest = match skip_field(rest) {
            Some(r) => r,
            None => return line,
        };
    }

    rest.trim_start()
}

fn skip_field(s: &str) -> Option<&str> {
    let s = s.trim_start_matches(' ');
    let end = s.find(' ')?;
    Some(&s[end..])
}

/// Compare two lines by their name column
pub fn compare_by_name(a: &str, b: &str) -> Ordering {
    name_column(a).cmp(name_column(b)).then_with(|| a.cmp(b))
}

/// Sort lines by their name column
pub fn sort_lines(lines: &mut [String]) {
    lines.sort_by(|a, b| compare_by_name(a, b));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EntryKind;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn entry(name: &str, size: Option<u64>, mtime: i64) -> NormalizedEntry {
        NormalizedEntry {
            permissions: "-rw-r--r--".into(),
            owner: "nouser".into(),
            group: "nogroup".into(),
            size,
            mtime,
            name: name.into(),
            kind: EntryKind::File,
            target: None,
            error: None,
        }
    }

    #[test]
    fn test_line_same_year() {
        let mtime = Utc
            .with_ymd_and_hms(2024, 3, 5, 9, 7, 0)
            .unwrap()
            .timestamp_millis();
        let line = canonical_line(&entry("f1", Some(10), mtime), now());
        assert_eq!(
            line,
            "-rw-r--r--    1 nouser   nogroup          10 Mar 05 09:07 f1"
        );
    }

    #[test]
    fn test_line_other_year_and_wide_size() {
        let mtime = Utc
            .with_ymd_and_hms(2019, 12, 31, 23, 0, 0)
            .unwrap()
            .timestamp_millis();
        let line = canonical_line(&entry("big.dat", Some(123_456_789_012), mtime), now());
        assert_eq!(
            line,
            "-rw-r--r--    1 nouser   nogroup  123456789012 Dec 31 2019  big.dat"
        );
    }

    #[test]
    fn test_owner_truncated() {
        let mut e = entry("f", Some(1), 0);
        e.owner = "averylongowner".into();
        let line = canonical_line(&e, now());
        assert!(line.contains(" averylon nogroup "));
        assert!(line.contains(" -            f"));
    }

    #[test]
    fn test_error_line() {
        let mut e = entry("bad", None, 0);
        e.permissions = "?rw-r--r--".into();
        e.error = Some("Permission denied: '/a/bad'".into());

        let line = canonical_line(&e, now());
        assert!(line.starts_with("err:?rw-r--r--    1 "));
        assert!(line.contains("          ? "));
        assert!(line.ends_with(" bad (exception: Permission denied: '/a/bad')"));
    }

    #[test]
    fn test_symlink_target() {
        let mut e = entry("latest", Some(1), 1);
        e.permissions = "lrwxrwxrwx".into();
        e.target = Some("data.grib".into());
        assert!(canonical_line(&e, now()).ends_with(" latest -> data.grib"));
    }

    #[test]
    fn test_name_column() {
        let t = Utc
            .with_ymd_and_hms(2024, 3, 5, 9, 7, 0)
            .unwrap()
            .timestamp_millis();
        let line = canonical_line(&entry("sub/my file", Some(10), t), now());
        assert_eq!(name_column(&line), "sub/my file");

        let line = canonical_line(&entry("old", Some(10), 0), now());
        assert_eq!(name_column(&line), "old");

        assert_eq!(name_column("garbage"), "garbage");
    }

    #[test]
    fn test_sort_lines_by_name() {
        let t = 1;
        let mut lines = vec![
            canonical_line(&entry("b", Some(1), t), now()),
            canonical_line(&entry("a", Some(999), t), now()),
        ];
        sort_lines(&mut lines);
        assert_eq!(name_column(&lines[0]), "a");
        assert_eq!(name_column(&lines[1]), "b");
    }
}
