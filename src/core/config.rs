//! Configuration system: TOML file + env var overrides + smart defaults.
//!
//! The TOML config covers operator-level knobs (target directory, severity
//! thresholds, file locations). User-facing toggles such as auto-clean live in
//! [`crate::core::settings`] and are editable at runtime.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SweepError};
use crate::core::paths::expand_home;

/// Name of the directory the coresymbolicationd daemon caches into.
pub const DEFAULT_TARGET_DIR_NAME: &str = "com.apple.coresymbolicationd";

/// 5 GiB.
pub const DEFAULT_WARNING_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// 10 GiB.
pub const DEFAULT_CRITICAL_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Full SymbolSweep configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub thresholds: ThresholdConfig,
    pub scanner: ScannerConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// The single cache directory that is monitored and cleaned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    pub path: PathBuf,
    /// When set, the target's final path component must equal this name.
    /// Guards against a config typo pointing the cleaner at a parent directory.
    pub required_dir_name: Option<String>,
}

/// Size thresholds separating normal / warning / critical.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub warning_bytes: u64,
    pub critical_bytes: u64,
}

/// Scanner worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    pub parallelism: usize,
}

/// In-process event bus sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscriber bounded channel capacity.
    pub channel_capacity: usize,
}

/// Activity log rotation and retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub jsonl_max_size_bytes: u64,
    pub jsonl_max_rotated_files: u32,
    pub jsonl_fsync_interval_secs: u64,
    pub sqlite_retention_days: u32,
}

/// Filesystem paths used by symsweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub settings_file: PathBuf,
    pub audit_log: PathBuf,
    pub status_file: PathBuf,
    pub sqlite_db: PathBuf,
    pub jsonl_log: PathBuf,
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[SSW-CONFIG] WARNING: HOME not set, falling back to /tmp for paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            path: home_dir()
                .join("Library")
                .join("Caches")
                .join(DEFAULT_TARGET_DIR_NAME),
            required_dir_name: Some(DEFAULT_TARGET_DIR_NAME.to_string()),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            warning_bytes: DEFAULT_WARNING_BYTES,
            critical_bytes: DEFAULT_CRITICAL_BYTES,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            jsonl_max_size_bytes: 10 * 1024 * 1024,
            jsonl_max_rotated_files: 3,
            jsonl_fsync_interval_secs: 10,
            sqlite_retention_days: 90,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir();
        let cfg = home.join(".config").join("symbolsweep").join("config.toml");
        let data = home.join(".local").join("share").join("symbolsweep");
        Self {
            config_file: cfg,
            settings_file: data.join("settings.json"),
            audit_log: data.join("deletions.log"),
            status_file: data.join("status.json"),
            sqlite_db: data.join("activity.sqlite3"),
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| SweepError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(SweepError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a so the value is stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // target
        if let Some(raw) = lookup("SSW_TARGET_PATH") {
            self.target.path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SSW_TARGET_REQUIRED_DIR_NAME") {
            self.target.required_dir_name = if raw == "-" { None } else { Some(raw) };
        }
        // thresholds
        set_u64(
            &mut lookup,
            "SSW_THRESHOLD_WARNING_BYTES",
            &mut self.thresholds.warning_bytes,
        )?;
        set_u64(
            &mut lookup,
            "SSW_THRESHOLD_CRITICAL_BYTES",
            &mut self.thresholds.critical_bytes,
        )?;
        // scanner / events
        set_usize(
            &mut lookup,
            "SSW_SCANNER_PARALLELISM",
            &mut self.scanner.parallelism,
        )?;
        set_usize(
            &mut lookup,
            "SSW_EVENTS_CHANNEL_CAPACITY",
            &mut self.events.channel_capacity,
        )?;
        // paths
        for (name, slot) in [
            ("SSW_SETTINGS_FILE", &mut self.paths.settings_file),
            ("SSW_AUDIT_LOG", &mut self.paths.audit_log),
            ("SSW_STATUS_FILE", &mut self.paths.status_file),
            ("SSW_SQLITE_DB", &mut self.paths.sqlite_db),
            ("SSW_JSONL_LOG", &mut self.paths.jsonl_log),
        ] {
            if let Some(raw) = lookup(name) {
                *slot = PathBuf::from(raw);
            }
        }
        Ok(())
    }

    /// Expand `~/` prefixes and strip trailing slashes so paths compare cleanly.
    fn normalize_paths(&mut self) {
        for path in [
            &mut self.target.path,
            &mut self.paths.settings_file,
            &mut self.paths.audit_log,
            &mut self.paths.status_file,
            &mut self.paths.sqlite_db,
            &mut self.paths.jsonl_log,
        ] {
            let expanded = expand_home(path);
            let s = expanded.to_string_lossy();
            *path = if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                PathBuf::from(stripped)
            } else {
                expanded.clone()
            };
        }
    }

    pub fn validate(&self) -> Result<()> {
        let target = &self.target.path;
        if !target.is_absolute() {
            return Err(SweepError::InvalidConfig {
                details: format!("target.path must be absolute, got {}", target.display()),
            });
        }
        if target.parent().is_none() || target == &home_dir() {
            return Err(SweepError::InvalidConfig {
                details: format!("target.path {} is not a cache directory", target.display()),
            });
        }
        if let Some(required) = &self.target.required_dir_name {
            let name = target.file_name().map(|n| n.to_string_lossy().into_owned());
            if name.as_deref() != Some(required.as_str()) {
                return Err(SweepError::InvalidConfig {
                    details: format!(
                        "target.path {} must end in the directory {required:?}",
                        target.display()
                    ),
                });
            }
        }

        if self.thresholds.warning_bytes == 0 {
            return Err(SweepError::InvalidConfig {
                details: "thresholds.warning_bytes must be > 0".to_string(),
            });
        }
        if self.thresholds.warning_bytes >= self.thresholds.critical_bytes {
            return Err(SweepError::InvalidConfig {
                details: format!(
                    "thresholds must ascend: warning ({}) < critical ({})",
                    self.thresholds.warning_bytes, self.thresholds.critical_bytes
                ),
            });
        }

        if self.scanner.parallelism == 0 {
            return Err(SweepError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        if self.events.channel_capacity == 0 {
            return Err(SweepError::InvalidConfig {
                details: "events.channel_capacity must be >= 1".to_string(),
            });
        }
        if self.logging.jsonl_max_size_bytes < 4096 {
            return Err(SweepError::InvalidConfig {
                details: format!(
                    "logging.jsonl_max_size_bytes ({}) must be >= 4096",
                    self.logging.jsonl_max_size_bytes
                ),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<u64>().map_err(|error| SweepError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<usize>()
            .map_err(|error| SweepError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Config, SweepError};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn with_target(path: &str) -> Config {
        let mut cfg = Config::default();
        cfg.target.path = PathBuf::from(path);
        cfg
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = with_target("/Users/me/Library/Caches/com.apple.coresymbolicationd");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.thresholds.warning_bytes, 5_368_709_120);
        assert_eq!(cfg.thresholds.critical_bytes, 10_737_418_240);
    }

    #[test]
    fn thresholds_must_ascend() {
        let mut cfg = with_target("/Users/me/Library/Caches/com.apple.coresymbolicationd");
        cfg.thresholds.warning_bytes = cfg.thresholds.critical_bytes;
        let err = cfg.validate().expect_err("expected validation error");
        match err {
            SweepError::InvalidConfig { details } => assert!(details.contains("ascend")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn target_must_match_required_dir_name() {
        let cfg = with_target("/Users/me/Library/Caches");
        let err = cfg.validate().expect_err("parent directory must be rejected");
        assert!(err.to_string().contains("com.apple.coresymbolicationd"));

        let mut relaxed = with_target("/var/tmp/some-cache");
        relaxed.target.required_dir_name = None;
        assert!(relaxed.validate().is_ok());
    }

    #[test]
    fn root_and_relative_targets_rejected() {
        let mut root = with_target("/");
        root.target.required_dir_name = None;
        assert!(root.validate().is_err());

        let mut relative = with_target("caches/x");
        relative.target.required_dir_name = None;
        assert!(relative.validate().is_err());
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let hash_before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.thresholds.warning_bytes += 1;
        let hash_after = modified.stable_hash().expect("hash should compute");
        assert_ne!(hash_before, hash_after);
        assert_eq!(hash_before, Config::default().stable_hash().unwrap());
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("SSW_TARGET_PATH", "/tmp/cache/com.apple.coresymbolicationd"),
            ("SSW_THRESHOLD_WARNING_BYTES", "100"),
            ("SSW_THRESHOLD_CRITICAL_BYTES", "200"),
            ("SSW_SCANNER_PARALLELISM", "3"),
            ("SSW_SETTINGS_FILE", "/tmp/s.json"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap();
        assert_eq!(
            cfg.target.path,
            PathBuf::from("/tmp/cache/com.apple.coresymbolicationd")
        );
        assert_eq!(cfg.thresholds.warning_bytes, 100);
        assert_eq!(cfg.thresholds.critical_bytes, 200);
        assert_eq!(cfg.scanner.parallelism, 3);
        assert_eq!(cfg.paths.settings_file, PathBuf::from("/tmp/s.json"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_override_can_clear_required_dir_name() {
        let env = vars(&[("SSW_TARGET_REQUIRED_DIR_NAME", "-")]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap();
        assert!(cfg.target.required_dir_name.is_none());
    }

    #[test]
    fn bad_env_number_is_parse_error() {
        let env = vars(&[("SSW_THRESHOLD_WARNING_BYTES", "five gigs")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .expect_err("non-numeric override must fail");
        assert_eq!(err.code(), "SSW-1003");
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("com.apple.coresymbolicationd");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!(
                "[target]\npath = {:?}\n\n[thresholds]\nwarning_bytes = 1000\ncritical_bytes = 2000\n",
                target.display().to_string()
            ),
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.target.path, target);
        assert_eq!(cfg.thresholds.warning_bytes, 1000);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn explicit_missing_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert_eq!(err.code(), "SSW-1002");
    }

    #[test]
    fn trailing_slash_stripped_from_target() {
        let mut cfg = with_target("/Users/me/Library/Caches/com.apple.coresymbolicationd/");
        cfg.normalize_paths();
        assert_eq!(
            cfg.target.path,
            PathBuf::from("/Users/me/Library/Caches/com.apple.coresymbolicationd")
        );
    }
}
