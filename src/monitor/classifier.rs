//! Severity classification of the cache size.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::config::{DEFAULT_CRITICAL_BYTES, DEFAULT_WARNING_BYTES, ThresholdConfig};

/// Cache severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl CacheState {
    /// Classify against the default 5 GiB / 10 GiB thresholds.
    pub fn from_size(bytes: u64) -> Self {
        Thresholds::default().classify(bytes)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds of the warning and critical bands. `warning < critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warning_bytes: u64,
    pub critical_bytes: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_bytes: DEFAULT_WARNING_BYTES,
            critical_bytes: DEFAULT_CRITICAL_BYTES,
        }
    }
}

impl From<&ThresholdConfig> for Thresholds {
    fn from(cfg: &ThresholdConfig) -> Self {
        Self {
            warning_bytes: cfg.warning_bytes,
            critical_bytes: cfg.critical_bytes,
        }
    }
}

impl Thresholds {
    pub const fn classify(&self, bytes: u64) -> CacheState {
        if bytes >= self.critical_bytes {
            CacheState::Critical
        } else if bytes >= self.warning_bytes {
            CacheState::Warning
        } else {
            CacheState::Normal
        }
    }
}
