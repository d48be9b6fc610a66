//! Human-readable run summaries.

use std::fmt;
use std::time::Duration;

/// Totals of a completed run, printed once the job finishes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub files: usize,
    pub total_bytes: u64,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} in {} ({} copied, {} unchanged, {} failed)",
            self.files,
            format_bytes(self.total_bytes),
            format_duration(self.elapsed.as_secs()),
            self.copied,
            self.skipped,
            self.failed
        )
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            files: 3,
            total_bytes: 2048,
            copied: 2,
            skipped: 1,
            failed: 0,
            elapsed: Duration::from_secs(75),
        };
        assert_eq!(
            summary.to_string(),
            "3 files, 2.00 KB in 1m 15s (2 copied, 1 unchanged, 0 failed)"
        );
    }
}
