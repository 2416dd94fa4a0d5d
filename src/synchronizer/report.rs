use std::fmt;

use colored::Colorize;

use crate::ext::ByteSizeExt;

/// What one scanner saw during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub directories: u64,
    pub files: u64,
    pub queued: u64,
}

/// Outcome counters of a synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Source directories mirrored into the destination
    pub directories: u64,
    /// Source files offered for synchronization
    pub files_scanned: u64,
    pub transferred: u64,
    /// Files whose destination copy was already up to date
    pub skipped: u64,
    pub deleted: u64,
    /// Transfers and deletions that failed and were left as they were
    pub failed: u64,
    pub bytes_transferred: u64,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn record_source_scan(&mut self, summary: ScanSummary) {
        self.directories += summary.directories;
        self.files_scanned += summary.files;
    }

    /// One-line summary for the terminal, coloured when `colored` is enabled
    pub fn summary_line(&self) -> String {
        let transferred = format!(
            "{} transferred ({})",
            self.transferred,
            self.bytes_transferred.human_size()
        );
        let deleted = format!("{} deleted", self.deleted);
        let failed = format!("{} failed", self.failed);
        let failed = if self.has_failures() {
            failed.as_str().red().bold()
        } else {
            failed.as_str().normal()
        };

        format!(
            "{} {}, {} up to date, {}, {}",
            "Synchronized:".green().bold(),
            transferred,
            self.skipped,
            deleted.as_str().yellow(),
            failed,
        )
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} directories, {} files: {} transferred ({}), {} up to date, {} deleted, {} failed",
            self.directories,
            self.files_scanned,
            self.transferred,
            self.bytes_transferred.human_size(),
            self.skipped,
            self.deleted,
            self.failed
        )
    }
}
