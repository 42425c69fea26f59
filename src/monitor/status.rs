//! Cache status snapshots and the on-disk status file shared with other processes.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SweepError};
use crate::core::format::{format_size, unix_now};
use crate::core::persist::write_json_atomic;
use crate::monitor::classifier::{CacheState, Thresholds};
use crate::scanner::walker::ScanInventory;

const MIB: u64 = 1024 * 1024;

/// Immutable view of the cache at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub total_bytes: u64,
    pub state: CacheState,
    pub target_path: String,
    pub exists: bool,
    pub item_count: u32,
    /// Unix seconds.
    pub measured_at: u64,
    /// Produced from `debug_simulated_size` instead of a real scan.
    #[serde(default)]
    pub simulated: bool,
    /// Free space on the volume holding the cache, when measurable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_free_bytes: Option<u64>,
}

impl CacheStatus {
    /// Status from a real scan.
    pub fn from_inventory(inventory: &ScanInventory, thresholds: &Thresholds) -> Self {
        let total_bytes = inventory.total_bytes;
        Self {
            total_bytes,
            state: thresholds.classify(total_bytes),
            target_path: inventory.root.to_string_lossy().into_owned(),
            exists: inventory.exists,
            item_count: if total_bytes == 0 {
                0
            } else {
                inventory.item_count()
            },
            measured_at: unix_now(),
            simulated: false,
            volume_free_bytes: None,
        }
    }

    /// Debug-mode status: `bytes` stands in for the measured total and the item
    /// count is synthesized as one item per MiB. `exists` is still the real
    /// presence of the target directory.
    pub fn simulated(target_path: &Path, exists: bool, bytes: u64, thresholds: &Thresholds) -> Self {
        let item_count = if bytes == 0 {
            0
        } else {
            u32::try_from((bytes / MIB).max(1)).unwrap_or(u32::MAX)
        };
        Self {
            total_bytes: bytes,
            state: thresholds.classify(bytes),
            target_path: target_path.to_string_lossy().into_owned(),
            exists,
            item_count,
            measured_at: unix_now(),
            simulated: true,
            volume_free_bytes: None,
        }
    }

    /// Status for a target directory that does not exist.
    pub fn missing(target_path: impl AsRef<Path>) -> Self {
        Self {
            total_bytes: 0,
            state: CacheState::Normal,
            target_path: target_path.as_ref().to_string_lossy().into_owned(),
            exists: false,
            item_count: 0,
            measured_at: unix_now(),
            simulated: false,
            volume_free_bytes: None,
        }
    }

    #[must_use]
    pub fn with_volume_free(mut self, free: Option<u64>) -> Self {
        self.volume_free_bytes = free;
        self
    }

    /// `"6 GB"`-style size.
    pub fn formatted_size(&self) -> String {
        format_size(self.total_bytes)
    }
}

// ──────────────────── status file ────────────────────

/// Contents of `status.json`, written by the daemon after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub version: String,
    pub pid: u32,
    /// RFC 3339.
    pub updated_at: String,
    pub status: CacheStatus,
}

impl StatusSnapshot {
    pub fn new(status: CacheStatus) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            updated_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            status,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self).map_err(|e| SweepError::Persistence {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
    }

    /// `Ok(None)` when no daemon has written a snapshot yet.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SweepError::io(path, e)),
        }
    }
}
