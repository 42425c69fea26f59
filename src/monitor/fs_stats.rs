//! Volume statistics for the filesystem that holds the cache directory.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SweepError};

/// Capacity snapshot of one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    /// Bytes available to unprivileged users.
    pub available_bytes: u64,
}

impl VolumeStats {
    /// Free percentage based on available bytes, `0.0` for an empty volume.
    #[allow(clippy::cast_precision_loss)]
    pub fn available_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.available_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}

/// Stats for the volume containing `path`.
///
/// A path that does not exist yet is measured through its nearest existing
/// ancestor, so a missing cache directory still reports the home volume.
pub fn volume_stats(path: &Path) -> Result<VolumeStats> {
    let probe = nearest_existing(path).ok_or_else(|| SweepError::Runtime {
        details: format!("no existing ancestor for {}", path.display()),
    })?;
    statvfs_bytes(&probe)
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(candidate) = current {
        if candidate.exists() {
            return Some(candidate.to_path_buf());
        }
        current = candidate.parent();
    }
    None
}

#[cfg(unix)]
#[allow(clippy::useless_conversion)]
fn statvfs_bytes(path: &Path) -> Result<VolumeStats> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|error| SweepError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::from(error),
    })?;
    let fragment = u64::from(stat.fragment_size());
    Ok(VolumeStats {
        total_bytes: u64::from(stat.blocks()).saturating_mul(fragment),
        free_bytes: u64::from(stat.blocks_free()).saturating_mul(fragment),
        available_bytes: u64::from(stat.blocks_available()).saturating_mul(fragment),
    })
}

#[cfg(not(unix))]
fn statvfs_bytes(path: &Path) -> Result<VolumeStats> {
    Err(SweepError::Runtime {
        details: format!("volume stats unsupported on this platform: {}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn stats_for_tempdir_are_sane() {
        let dir = tempfile::tempdir().unwrap();
        let stats = volume_stats(dir.path()).unwrap();
        assert!(stats.total_bytes > 0);
        assert!(stats.free_bytes <= stats.total_bytes);
        assert!(stats.available_bytes <= stats.total_bytes);
        assert!((0.0..=100.0).contains(&stats.available_pct()));
    }

    #[cfg(unix)]
    #[test]
    fn missing_path_uses_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("a/b/c");
        let via_missing = volume_stats(&missing).unwrap();
        assert!(via_missing.total_bytes > 0);
    }

    #[test]
    fn empty_volume_pct_is_zero() {
        let stats = VolumeStats {
            total_bytes: 0,
            free_bytes: 0,
            available_bytes: 0,
        };
        assert!(stats.available_pct().abs() < f64::EPSILON);
    }
}
