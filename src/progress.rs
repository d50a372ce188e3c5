//! Progress reporting for the listing tool
//!
//! Provides a live spinner using indicatif and a styled summary. Everything
//! here writes to stderr so it never mixes with listing lines on stdout.

use crate::walker::{ListingProgress, ListingReport};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays listing status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        if let Ok(spinner) = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &ListingProgress) {
        self.bar.set_message(progress_message(progress));
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// One-line status for a progress snapshot
pub fn progress_message(progress: &ListingProgress) -> String {
    format!(
        "Dirs: {} | Entries: {} | Errors: {} | Size: {} | Rate: {:.0}/s | Queue: {} | Workers: {}/{}",
        format_number(progress.dirs),
        format_number(progress.emitted),
        format_number(progress.errors),
        format_size(progress.bytes, BINARY),
        progress.entries_per_second(),
        progress.queue_size,
        progress.active_workers,
        progress.total_workers,
    )
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the listing
pub fn print_summary(report: &ListingReport, destination: &str) {
    let duration_secs = report.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        report.emitted as f64 / duration_secs
    } else {
        0.0
    };

    let title = if report.completed {
        style("Listing Complete").green().bold()
    } else {
        style("Listing Interrupted").yellow().bold()
    };

    eprintln!();
    eprintln!("{}", title);
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Directories:").bold(), format_number(report.directories));
    eprintln!("  {} {}", style("Entries:").bold(), format_number(report.emitted as u64));
    eprintln!("  {} {}", style("Total Size:").bold(), format_size(report.bytes, BINARY));
    eprintln!(
        "  {} {:.1}s ({:.0} entries/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if report.errors > 0 {
        eprintln!("  {} {}", style("Errors:").yellow().bold(), format_number(report.errors));
    }
    if report.overflow.truncated() {
        eprintln!(
            "  {} depth {}, entries {}, directories {}",
            style("Truncated:").yellow().bold(),
            format_number(report.overflow.depth),
            format_number(report.overflow.entries),
            format_number(report.overflow.directories),
        );
    }
    if let Some(push) = &report.push {
        eprintln!(
            "  {} {} received, {} accepted, {} malformed on '{}'",
            style("Push:").bold(),
            format_number(push.received),
            format_number(push.accepted),
            format_number(push.malformed),
            push.topic,
        );
    }
    eprintln!("  {} {}", style("Output:").bold(), destination);
    eprintln!();
}

/// Print a header at the start of the listing
pub fn print_header(root: &str, workers: usize, output: &str) {
    eprintln!();
    eprintln!(
        "{} {}",
        style("remote-walker").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Source:").bold(), root);
    eprintln!("  {} {}", style("Workers:").bold(), workers);
    eprintln!("  {} {}", style("Output:").bold(), output);
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }
}
