//! Size scanner: inventories the direct children of the cache directory.
//!
//! Each top-level entry becomes one [`DeletionItem`] whose size is the sum of
//! every regular file (and symlink) beneath it. Directory sizing is spread over
//! a small worker pool fed by a crossbeam channel. Symlinks are measured as
//! links and never traversed.
//!
//! Scanning never fails outright. A missing root is a valid result
//! (`exists == false`); unreadable sub-entries are skipped and counted; an
//! unreadable root yields an empty inventory with `root_error` set.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use serde::{Deserialize, Serialize};

/// One direct child of the cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionItem {
    pub path: String,
    pub size_bytes: u64,
    pub is_directory: bool,
}

impl DeletionItem {
    /// Final path component, for log lines.
    pub fn name(&self) -> String {
        Path::new(&self.path)
            .file_name()
            .map_or_else(|| self.path.clone(), |n| n.to_string_lossy().into_owned())
    }
}

/// Result of one scan of the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanInventory {
    pub root: PathBuf,
    pub exists: bool,
    /// Set when the root exists but could not be listed.
    pub root_error: Option<String>,
    /// Direct children sorted by path.
    pub items: Vec<DeletionItem>,
    pub total_bytes: u64,
    /// Entries below the root that could not be read.
    pub unreadable_entries: u64,
    pub duration: Duration,
}

impl ScanInventory {
    fn empty(root: &Path, exists: bool, root_error: Option<String>, started: Instant) -> Self {
        Self {
            root: root.to_path_buf(),
            exists,
            root_error,
            items: Vec::new(),
            total_bytes: 0,
            unreadable_entries: 0,
            duration: started.elapsed(),
        }
    }

    /// Number of direct children, saturating at `u32::MAX`.
    pub fn item_count(&self) -> u32 {
        u32::try_from(self.items.len()).unwrap_or(u32::MAX)
    }

    pub fn is_readable(&self) -> bool {
        self.root_error.is_none()
    }
}

/// Measures the cache directory.
#[derive(Debug, Clone)]
pub struct SizeScanner {
    root: PathBuf,
    parallelism: usize,
}

/// A top-level entry awaiting its size.
struct Pending {
    index: usize,
    path: PathBuf,
}

impl SizeScanner {
    pub fn new(root: impl Into<PathBuf>, parallelism: usize) -> Self {
        Self {
            root: root.into(),
            parallelism: parallelism.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the cache directory is present, without sizing it.
    pub fn root_exists(&self) -> bool {
        fs::symlink_metadata(&self.root).is_ok()
    }

    /// Inventory the root's direct children.
    pub fn scan(&self) -> ScanInventory {
        let started = Instant::now();
        let root = self.root.as_path();

        match fs::symlink_metadata(root) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return ScanInventory::empty(root, false, None, started);
            }
            Err(err) => return unreadable_root(root, &err.to_string(), started),
        }

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => return unreadable_root(root, &err.to_string(), started),
        };

        let mut items = Vec::new();
        let mut pending = Vec::new();
        let mut unreadable = 0u64;

        for entry_result in entries {
            let Ok(entry) = entry_result else {
                unreadable += 1;
                continue;
            };
            let path = entry.path();
            let Ok(meta) = fs::symlink_metadata(&path) else {
                unreadable += 1;
                continue;
            };
            let is_directory = meta.is_dir();
            if is_directory {
                pending.push(Pending {
                    index: items.len(),
                    path: path.clone(),
                });
            }
            items.push(DeletionItem {
                path: path.to_string_lossy().into_owned(),
                size_bytes: if is_directory { 0 } else { meta.len() },
                is_directory,
            });
        }

        unreadable += self.size_directories(&mut items, pending);

        items.sort_by(|a, b| a.path.cmp(&b.path));
        let total_bytes = items
            .iter()
            .fold(0u64, |acc, item| acc.saturating_add(item.size_bytes));

        ScanInventory {
            root: root.to_path_buf(),
            exists: true,
            root_error: None,
            items,
            total_bytes,
            unreadable_entries: unreadable,
            duration: started.elapsed(),
        }
    }

    /// Fill in recursive sizes for directory items. Returns unreadable count.
    fn size_directories(&self, items: &mut [DeletionItem], pending: Vec<Pending>) -> u64 {
        if pending.is_empty() {
            return 0;
        }
        let workers = self.parallelism.min(pending.len());
        let (work_tx, work_rx) = channel::bounded::<Pending>(pending.len());
        let (result_tx, result_rx) = channel::unbounded::<(usize, u64, u64)>();

        for job in pending {
            // Capacity equals job count, so this never blocks.
            let _ = work_tx.send(job);
        }
        drop(work_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(job) = work_rx.recv() {
                        let (bytes, unreadable) = tree_size(&job.path);
                        let _ = result_tx.send((job.index, bytes, unreadable));
                    }
                });
            }
        });
        drop(result_tx);

        let mut unreadable_total = 0u64;
        for (index, bytes, unreadable) in result_rx {
            if let Some(item) = items.get_mut(index) {
                item.size_bytes = bytes;
            }
            unreadable_total += unreadable;
        }
        unreadable_total
    }
}

fn unreadable_root(root: &Path, reason: &str, started: Instant) -> ScanInventory {
    eprintln!("[SSW-SCAN] cannot read {}: {reason}", root.display());
    ScanInventory::empty(root, true, Some(reason.to_string()), started)
}

/// Total bytes of files and symlinks under `dir`, without following links.
fn tree_size(dir: &Path) -> (u64, u64) {
    let mut total = 0u64;
    let mut unreadable = 0u64;
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            unreadable += 1;
            continue;
        };
        for entry_result in entries {
            let Ok(entry) = entry_result else {
                unreadable += 1;
                continue;
            };
            let Ok(ft) = entry.file_type() else {
                unreadable += 1;
                continue;
            };
            if ft.is_dir() {
                stack.push(entry.path());
                continue;
            }
            match entry.metadata() {
                Ok(meta) => total = total.saturating_add(meta.len()),
                Err(_) => unreadable += 1,
            }
        }
    }
    (total, unreadable)
}
