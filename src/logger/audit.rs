//! Human-readable deletion audit log.
//!
//! Append-only plain text, one `[YYYY-MM-DD HH:MM:SS] message` line per entry
//! in local time. Every clean appends its whole block with a single write so
//! concurrent appenders cannot interleave lines mid-operation.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::errors::{Result, SweepError};

/// Writer for the deletions log.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

/// Lines collected for one operation, flushed together.
#[derive(Debug, Default)]
pub struct AuditBlock {
    lines: Vec<String>,
}

impl AuditBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a timestamped line.
    pub fn line(&mut self, message: impl AsRef<str>) {
        self.lines
            .push(format!("[{}] {}", local_timestamp(), message.as_ref()));
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a block, creating the file and its directory on first use.
    pub fn append(&self, block: &AuditBlock) -> Result<()> {
        if block.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
        }
        let mut payload = block.lines.join("\n");
        payload.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SweepError::io(&self.path, e))?;
        file.write_all(payload.as_bytes())
            .map_err(|e| SweepError::io(&self.path, e))?;
        Ok(())
    }

    /// Last `n` lines, oldest first. A missing log reads as empty.
    pub fn tail(&self, n: usize) -> Result<Vec<String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SweepError::io(&self.path, e)),
        };
        let lines: Vec<&str> = raw.lines().collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].iter().map(|l| (*l).to_string()).collect())
    }
}

fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
