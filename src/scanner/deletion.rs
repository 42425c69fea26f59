//! Clean executor: single-flight removal of the cache directory's contents.
//!
//! Pipeline: acquire the in-flight flag -> fresh scan -> (dry run: report only)
//! -> per-item safety check and removal -> audit block -> activity event
//! -> record `last_clean_timestamp`.
//!
//! Safety rules:
//! 1. Only direct children of the configured root are ever removed.
//! 2. Symlinks are unlinked, never followed.
//! 3. One failing item never stops the others; it is recorded in `failures`.
//!
//! A second clean requested while one is running fails fast with
//! [`SweepError::CleanInProgress`]; it is not queued. This holds across
//! processes too: a clean also holds `clean.lock` next to the audit log, so a
//! manual `symsweep clean` cannot race the daemon's auto-clean.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SweepError};
use crate::core::format::{format_size, unix_now};
use crate::core::paths::is_direct_child;
use crate::core::persist::{FileLock, LockWait, lock_exclusive};
use crate::core::settings::SettingsStore;
use crate::logger::audit::{AuditBlock, AuditLog};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::walker::{DeletionItem, ScanInventory, SizeScanner};

/// Held for the duration of a clean, in the audit log's directory.
const CLEAN_LOCK_FILE: &str = "clean.lock";

// ──────────────────── result types ────────────────────

/// What started a clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanTrigger {
    Manual,
    Threshold,
    Schedule,
}

impl CleanTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Threshold => "threshold",
            Self::Schedule => "schedule",
        }
    }
}

/// One item that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub path: String,
    pub error_code: String,
    pub message: String,
}

/// Outcome of one clean or dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanResult {
    /// False only when the directory could not be listed. Per-item failures
    /// are reported in `failures` and leave this true.
    pub success: bool,
    /// Bytes actually removed; for a dry run, the bytes that would be removed.
    pub bytes_freed: u64,
    pub items_removed: u32,
    /// Unix seconds.
    pub timestamp: u64,
    pub message: String,
    pub was_dry_run: bool,
    /// Inventory taken at the start of the operation.
    pub items_found: Vec<DeletionItem>,
    #[serde(default)]
    pub failures: Vec<ItemFailure>,
    pub trigger: CleanTrigger,
}

impl CleanResult {
    fn new(dry_run: bool, trigger: CleanTrigger) -> Self {
        Self {
            success: true,
            bytes_freed: 0,
            items_removed: 0,
            timestamp: unix_now(),
            message: String::new(),
            was_dry_run: dry_run,
            items_found: Vec::new(),
            failures: Vec::new(),
            trigger,
        }
    }
}

// ──────────────────── executor ────────────────────

/// Performs cleans against the configured cache directory.
pub struct CleanExecutor {
    scanner: SizeScanner,
    settings: Arc<SettingsStore>,
    audit: AuditLog,
    logger: Option<ActivityLoggerHandle>,
    in_flight: AtomicBool,
    lock_path: PathBuf,
}

/// Clears the in-flight flag and releases the lock file when the clean ends,
/// including on panic.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    _lock: FileLock,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl CleanExecutor {
    pub fn new(
        scanner: SizeScanner,
        settings: Arc<SettingsStore>,
        audit: AuditLog,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        let lock_path = audit
            .path()
            .parent()
            .map_or_else(|| PathBuf::from(CLEAN_LOCK_FILE), |dir| dir.join(CLEAN_LOCK_FILE));
        Self {
            scanner,
            settings,
            audit,
            logger,
            in_flight: AtomicBool::new(false),
            lock_path,
        }
    }

    /// Whether a clean is currently running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// User-initiated clean.
    pub fn clean(&self, dry_run: bool) -> Result<CleanResult> {
        self.clean_with_trigger(dry_run, CleanTrigger::Manual)
    }

    pub fn clean_with_trigger(&self, dry_run: bool, trigger: CleanTrigger) -> Result<CleanResult> {
        let _guard = self.acquire()?;
        let started = Instant::now();

        // Never act on a cached inventory: the directory may have changed.
        let inventory = self.scanner.scan();
        let root = inventory.root.display().to_string();

        let mut block = AuditBlock::new();
        block.line(if dry_run {
            format!("=== DRY RUN STARTED ({}) ===", trigger.as_str())
        } else {
            format!("=== CLEAN STARTED ({}) ===", trigger.as_str())
        });
        block.line(format!("Target path: {root}"));

        let mut result = CleanResult::new(dry_run, trigger);
        if !inventory.exists {
            result.message = "Cache directory does not exist - nothing to clean".to_string();
            block.line(&result.message);
        } else if let Some(reason) = &inventory.root_error {
            result.success = false;
            result.message = format!("Cannot read cache directory: {reason}");
            block.line(format!("FAILED: {}", result.message));
        } else {
            block.line(format!(
                "Found {} items totaling {}",
                inventory.items.len(),
                format_size(inventory.total_bytes)
            ));
            result.items_found.clone_from(&inventory.items);
            if dry_run {
                Self::preview(&inventory, &mut result, &mut block);
            } else {
                self.remove_items(&inventory, &mut result, &mut block);
            }
        }

        block.line(summary_line(&result, &root));
        if let Err(e) = self.audit.append(&block) {
            eprintln!("[SSW-CLEAN] audit log write failed: {e}");
        }

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as u64;
        self.log_event(ActivityEvent::CleanCompleted {
            trigger: trigger.as_str().to_string(),
            dry_run,
            success: result.success,
            bytes_freed: result.bytes_freed,
            items_removed: result.items_removed,
            items_failed: u32::try_from(result.failures.len()).unwrap_or(u32::MAX),
            duration_ms,
            message: result.message.clone(),
        });

        if !dry_run && result.success {
            let ts = result.timestamp;
            if let Err(e) = self.settings.update(|s| s.last_clean_timestamp = ts) {
                // The files are already gone; report the clean, flag the bookkeeping.
                eprintln!("[SSW-CLEAN] failed to record last clean time: {e}");
                self.log_event(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("recording last_clean_timestamp: {e}"),
                });
            }
        }

        Ok(result)
    }

    fn acquire(&self) -> Result<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SweepError::CleanInProgress)?;

        let lock = match lock_exclusive(&self.lock_path, LockWait::Try) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                self.in_flight.store(false, Ordering::Release);
                return Err(SweepError::CleanInProgress);
            }
            Err(e) => {
                self.in_flight.store(false, Ordering::Release);
                return Err(SweepError::io(&self.lock_path, e));
            }
        };
        Ok(InFlightGuard {
            flag: &self.in_flight,
            _lock: lock,
        })
    }

    fn preview(inventory: &ScanInventory, result: &mut CleanResult, block: &mut AuditBlock) {
        for item in &inventory.items {
            block.line(format!(
                "WOULD DELETE: {} ({}, {})",
                item.name(),
                format_size(item.size_bytes),
                kind(item)
            ));
        }
        result.bytes_freed = inventory.total_bytes;
        result.items_removed = inventory.item_count();
        result.message = format!(
            "Dry run: would delete {} ({} items)",
            format_size(result.bytes_freed),
            result.items_removed
        );
    }

    fn remove_items(
        &self,
        inventory: &ScanInventory,
        result: &mut CleanResult,
        block: &mut AuditBlock,
    ) {
        for item in &inventory.items {
            let path = Path::new(&item.path);
            if !is_direct_child(&inventory.root, path) {
                let err = SweepError::SafetyVeto {
                    path: path.to_path_buf(),
                    reason: "not a direct child of the cache directory".to_string(),
                };
                block.line(format!("SAFETY: refused {}: {err}", item.path));
                self.record_failure(result, item, &err);
                continue;
            }

            let item_start = Instant::now();
            match delete_item(path) {
                Ok(true) => {
                    result.bytes_freed = result.bytes_freed.saturating_add(item.size_bytes);
                    result.items_removed = result.items_removed.saturating_add(1);
                    block.line(format!(
                        "DELETED: {} ({}, {})",
                        item.name(),
                        format_size(item.size_bytes),
                        kind(item)
                    ));
                    #[allow(clippy::cast_possible_truncation)]
                    self.log_event(ActivityEvent::ItemDeleted {
                        path: item.path.clone(),
                        size_bytes: item.size_bytes,
                        is_directory: item.is_directory,
                        duration_ms: item_start.elapsed().as_millis() as u64,
                    });
                }
                Ok(false) => {
                    block.line(format!("SKIPPED: {} (already gone)", item.name()));
                }
                Err(err) => {
                    block.line(format!("FAILED to delete {}: {err}", item.path));
                    self.record_failure(result, item, &err);
                }
            }
        }

        result.message = if result.failures.is_empty() {
            format!(
                "Cleaned {} ({} items)",
                format_size(result.bytes_freed),
                result.items_removed
            )
        } else {
            format!(
                "Cleaned {} ({} items, {} failed)",
                format_size(result.bytes_freed),
                result.items_removed,
                result.failures.len()
            )
        };
    }

    fn record_failure(&self, result: &mut CleanResult, item: &DeletionItem, err: &SweepError) {
        self.log_event(ActivityEvent::ItemDeletionFailed {
            path: item.path.clone(),
            error_code: err.code().to_string(),
            error_message: err.to_string(),
        });
        result.failures.push(ItemFailure {
            path: item.path.clone(),
            error_code: err.code().to_string(),
            message: err.to_string(),
        });
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

// ──────────────────── deletion ────────────────────

/// Remove one item without following symlinks.
///
/// `Ok(false)` when the item had already disappeared.
fn delete_item(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(SweepError::io(path, e)),
    };

    let outcome = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match outcome {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(SweepError::io(path, e)),
    }

    if fs::symlink_metadata(path).is_ok() {
        return Err(SweepError::Runtime {
            details: format!("path still exists after deletion: {}", path.display()),
        });
    }
    Ok(true)
}

const fn kind(item: &DeletionItem) -> &'static str {
    if item.is_directory { "directory" } else { "file" }
}

fn summary_line(result: &CleanResult, root: &str) -> String {
    if result.was_dry_run {
        format!(
            "Dry run complete: would free {} ({} items) in {root}",
            format_size(result.bytes_freed),
            result.items_removed
        )
    } else {
        format!(
            "Clean complete: freed {} ({} bytes, {} items removed, {} failed) in {root}",
            format_size(result.bytes_freed),
            result.bytes_freed,
            result.items_removed,
            result.failures.len()
        )
    }
}
