use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of outcome messages shown in one display.
pub const DISPLAY_LIMIT: usize = 10;

pub const SUCCESS_MARKER: &str = "✅";
pub const FAILURE_MARKER: &str = "❌";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub uploaded: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Every outcome in order; only the display is capped.
    pub files: Vec<String>,
}

impl SyncResult {
    pub fn record_uploaded(&mut self, name: &str) {
        self.uploaded += 1;
        self.files.push(format!("{SUCCESS_MARKER} Uploaded: {name}"));
    }

    pub fn record_downloaded(&mut self, name: &str) {
        self.downloaded += 1;
        self.files.push(format!("{SUCCESS_MARKER} Downloaded: {name}"));
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_error(&mut self, name: &str) {
        self.errors += 1;
        self.files.push(format!("{FAILURE_MARKER} Error: {name}"));
    }

    pub fn merge(&mut self, other: SyncResult) {
        self.uploaded += other.uploaded;
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.files.extend(other.files);
    }

    pub fn transferred(&self) -> usize {
        self.uploaded + self.downloaded
    }

    pub fn summary_lines(&self, limit: usize) -> &[String] {
        &self.files[..self.files.len().min(limit)]
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "uploaded: {}, downloaded: {}, skipped: {}, errors: {}",
            self.uploaded, self.downloaded, self.skipped, self.errors
        )?;
        for line in self.summary_lines(DISPLAY_LIMIT) {
            writeln!(f, "  {line}")?;
        }
        let hidden = self.files.len().saturating_sub(DISPLAY_LIMIT);
        if hidden > 0 {
            writeln!(f, "  ... and {hidden} more")?;
        }
        Ok(())
    }
}
