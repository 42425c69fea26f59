//! User settings: durable JSON record with lenient loading and atomic updates.
//!
//! Unlike [`crate::core::config`], settings are edited at runtime (from the CLI
//! or any other surface) and every accepted edit is persisted before it becomes
//! visible. A damaged file never prevents startup: each field that is missing or
//! has the wrong type falls back to its default on its own.
//!
//! The file is the source of truth. Several processes (the daemon and one-shot
//! CLI invocations) share it, so every update re-reads it under an exclusive
//! lock before applying its edit.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::config::DEFAULT_WARNING_BYTES;
use crate::core::errors::{Result, SweepError};
use crate::core::persist::{LockWait, lock_exclusive, write_json_atomic};
use crate::daemon::events::{BridgeEvent, EventBus};

/// Default per-subscriber buffer for settings notifications.
const SETTINGS_CHANNEL_CAPACITY: usize = 16;

/// Persisted user settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Clean automatically when the cache grows past `auto_clean_threshold`.
    pub auto_clean_on_threshold: bool,
    pub auto_clean_threshold: u64,
    /// Clean automatically every `auto_clean_interval_secs`.
    pub auto_clean_scheduled: bool,
    pub auto_clean_interval_secs: u32,
    pub show_notifications: bool,
    pub launch_at_login: bool,
    /// Unix seconds of the last successful real clean; 0 means never.
    pub last_clean_timestamp: u64,
    pub monitor_interval_secs: u32,
    /// Replace measured sizes with `debug_simulated_size`. Deletion is unaffected.
    pub debug_mode: bool,
    pub debug_simulated_size: u64,
    pub first_run_completed: bool,
    pub first_clean_confirmed: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_clean_on_threshold: false,
            auto_clean_threshold: DEFAULT_WARNING_BYTES,
            auto_clean_scheduled: false,
            auto_clean_interval_secs: 6 * 60 * 60,
            show_notifications: true,
            launch_at_login: false,
            last_clean_timestamp: 0,
            monitor_interval_secs: 60,
            debug_mode: false,
            debug_simulated_size: 0,
            first_run_completed: false,
            first_clean_confirmed: false,
        }
    }
}

impl Settings {
    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.monitor_interval_secs == 0 {
            return Err(SweepError::InvalidSettings {
                details: "monitor_interval_secs must be >= 1".to_string(),
            });
        }
        if self.auto_clean_interval_secs == 0 {
            return Err(SweepError::InvalidSettings {
                details: "auto_clean_interval_secs must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// Parse persisted JSON, coercing bad fields to defaults.
    ///
    /// Returns the settings plus the names of fields that were coerced. A
    /// document that is not a JSON object coerces every field.
    pub fn from_json_lenient(raw: &str) -> (Self, Vec<String>) {
        let defaults = Self::default();
        let Ok(Value::Object(defaults_map)) = serde_json::to_value(&defaults) else {
            return (defaults, Vec::new());
        };
        let input = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => return (defaults, defaults_map.keys().cloned().collect()),
        };

        let mut merged: Map<String, Value> = defaults_map.clone();
        let mut coerced = Vec::new();
        for key in defaults_map.keys() {
            // Absent fields are normal for files written by older versions.
            let Some(candidate) = input.get(key) else {
                continue;
            };
            // Probe the field alone against otherwise-default settings.
            let mut probe = defaults_map.clone();
            probe.insert(key.clone(), candidate.clone());
            if serde_json::from_value::<Self>(Value::Object(probe)).is_ok() {
                merged.insert(key.clone(), candidate.clone());
            } else {
                coerced.push(key.clone());
            }
        }

        let mut settings =
            serde_json::from_value::<Self>(Value::Object(merged)).unwrap_or_else(|_| Self::default());
        // Zero intervals would stall the loop; treat them as corrupt too.
        if settings.monitor_interval_secs == 0 {
            settings.monitor_interval_secs = defaults.monitor_interval_secs;
            coerced.push("monitor_interval_secs".to_string());
        }
        if settings.auto_clean_interval_secs == 0 {
            settings.auto_clean_interval_secs = defaults.auto_clean_interval_secs;
            coerced.push("auto_clean_interval_secs".to_string());
        }
        (settings, coerced)
    }

    /// Apply a `key=value` edit from a text surface such as the CLI.
    pub fn set_field(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut map = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => {
                return Err(SweepError::Runtime {
                    details: "settings did not serialize to an object".to_string(),
                });
            }
        };
        let Some(current) = map.get(key) else {
            return Err(SweepError::InvalidSettings {
                details: format!("unknown setting {key:?}"),
            });
        };
        let value = match current {
            Value::Bool(_) => Value::Bool(raw.trim().parse::<bool>().map_err(|e| {
                SweepError::InvalidSettings {
                    details: format!("{key} expects true/false, got {raw:?}: {e}"),
                }
            })?),
            _ => Value::from(raw.trim().parse::<u64>().map_err(|e| {
                SweepError::InvalidSettings {
                    details: format!("{key} expects a non-negative integer, got {raw:?}: {e}"),
                }
            })?),
        };
        map.insert(key.to_string(), value);
        *self = serde_json::from_value(Value::Object(map)).map_err(|e| {
            SweepError::InvalidSettings {
                details: format!("{key}={raw:?}: {e}"),
            }
        })?;
        Ok(())
    }
}

// ──────────────────── store ────────────────────

/// Owner of the process-wide [`Settings`].
///
/// Updates are serialized on a mutex and on `<file>.lock`: re-read, apply,
/// validate, persist, commit, publish. A write that fails leaves both the file
/// and the in-memory value untouched.
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<Settings>,
    changes: EventBus<Settings>,
    bridge: Option<EventBus<BridgeEvent>>,
}

impl SettingsStore {
    /// Load settings from `path`. Never fails: absent or damaged data yields defaults.
    pub fn open(path: &Path) -> Self {
        let settings = read_or_default(path);
        Self {
            path: path.to_path_buf(),
            current: Mutex::new(settings),
            changes: EventBus::new(SETTINGS_CHANNEL_CAPACITY),
            bridge: None,
        }
    }

    /// Also publish [`BridgeEvent::SettingsUpdated`] on `bus` after each update.
    #[must_use]
    pub fn with_bridge(mut self, bus: EventBus<BridgeEvent>) -> Self {
        self.bridge = Some(bus);
        self
    }

    /// Location of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current snapshot.
    pub fn load(&self) -> Settings {
        self.current.lock().clone()
    }

    /// Read-modify-write against the file on disk. Returns the committed settings.
    ///
    /// Edits made by other processes since this store last looked are kept.
    pub fn update<F>(&self, mutator: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        self.try_update(|s| {
            mutator(s);
            Ok(())
        })
    }

    /// [`update`](Self::update) with a mutator that may reject the edit.
    pub fn try_update<F>(&self, mutator: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        let mut guard = self.current.lock();
        let lock_path = lock_path_for(&self.path);
        let _file_lock = lock_exclusive(&lock_path, LockWait::Block).map_err(|e| {
            SweepError::Persistence {
                path: lock_path.clone(),
                details: e.to_string(),
            }
        })?;
        let mut candidate = read_settings_file(&self.path, true)
            .map_err(|e| SweepError::Persistence {
                path: self.path.clone(),
                details: format!("re-reading before update: {e}"),
            })?
            .unwrap_or_default();
        mutator(&mut candidate)?;
        candidate.validate()?;

        write_json_atomic(&self.path, &candidate).map_err(|e| SweepError::Persistence {
            path: self.path.clone(),
            details: e.to_string(),
        })?;

        *guard = candidate.clone();
        drop(guard);
        self.publish(&candidate);
        Ok(candidate)
    }

    /// Replace every field at once.
    pub fn replace(&self, settings: Settings) -> Result<Settings> {
        self.update(move |current| *current = settings)
    }

    /// Re-read the file, e.g. after another process edited it.
    pub fn reload(&self) -> Settings {
        let fresh = read_or_default(&self.path);
        *self.current.lock() = fresh.clone();
        self.publish(&fresh);
        fresh
    }

    /// Adopt the on-disk settings if another process changed them.
    ///
    /// Returns the new settings when they differ from the current snapshot;
    /// only then are subscribers notified.
    pub fn refresh(&self) -> Option<Settings> {
        // An unreadable file keeps the last good snapshot.
        let fresh = read_settings_file(&self.path, false).ok()?.unwrap_or_default();
        {
            let mut guard = self.current.lock();
            if *guard == fresh {
                return None;
            }
            *guard = fresh.clone();
        }
        self.publish(&fresh);
        Some(fresh)
    }

    /// Receive the full settings after every successful update or reload.
    pub fn subscribe(&self) -> Receiver<Settings> {
        self.changes.subscribe()
    }

    fn publish(&self, settings: &Settings) {
        self.changes.publish(settings);
        if let Some(bus) = &self.bridge {
            bus.publish(&BridgeEvent::SettingsUpdated(settings.clone()));
        }
    }
}

/// `settings.json` → `settings.json.lock`.
fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Parse the settings file. `Ok(None)` when it does not exist.
fn read_settings_file(path: &Path, report: bool) -> std::io::Result<Option<Settings>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let (settings, coerced) = Settings::from_json_lenient(&raw);
    if report && !coerced.is_empty() {
        eprintln!(
            "[SSW-SETTINGS] {}: reset to defaults: {}",
            path.display(),
            coerced.join(", ")
        );
    }
    Ok(Some(settings))
}

fn read_or_default(path: &Path) -> Settings {
    match read_settings_file(path, true) {
        Ok(settings) => settings.unwrap_or_default(),
        Err(e) => {
            eprintln!(
                "[SSW-SETTINGS] cannot read {}: {e}; using defaults",
                path.display()
            );
            Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> SettingsStore {
        SettingsStore::open(&dir.join("settings.json"))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert_eq!(store.load(), Settings::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert!(!s.auto_clean_on_threshold);
        assert_eq!(s.auto_clean_threshold, 5 * 1024 * 1024 * 1024);
        assert_eq!(s.auto_clean_interval_secs, 21_600);
        assert!(s.show_notifications);
        assert_eq!(s.monitor_interval_secs, 60);
        assert_eq!(s.last_clean_timestamp, 0);
    }

    #[test]
    fn update_persists_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let updated = store
            .update(|s| {
                s.auto_clean_on_threshold = true;
                s.monitor_interval_secs = 30;
            })
            .unwrap();

        let reopened = store_in(dir.path());
        assert_eq!(reopened.load(), updated);
        assert!(reopened.load().auto_clean_on_threshold);
    }

    #[test]
    fn invalid_update_is_rejected_and_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let err = store.update(|s| s.monitor_interval_secs = 0).unwrap_err();
        assert_eq!(err.code(), "SSW-1004");
        assert_eq!(store.load().monitor_interval_secs, 60);
        assert!(!store.path().exists());
    }

    #[test]
    fn persistence_failure_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // Parent "directory" is a regular file, so the write cannot succeed.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let store = SettingsStore::open(&blocker.join("settings.json"));
        let rx = store.subscribe();

        let err = store.update(|s| s.debug_mode = true).unwrap_err();
        assert_eq!(err.code(), "SSW-3004");
        assert!(!store.load().debug_mode);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscribers_see_each_committed_update() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = EventBus::new(8);
        let bridge_rx = bridge.subscribe();
        let store = store_in(dir.path()).with_bridge(bridge);
        let rx = store.subscribe();

        store.update(|s| s.show_notifications = false).unwrap();
        store.update(|s| s.launch_at_login = true).unwrap();

        let first = rx.try_recv().unwrap();
        assert!(!first.show_notifications);
        assert!(!first.launch_at_login);
        let second = rx.try_recv().unwrap();
        assert!(second.launch_at_login);
        assert!(rx.try_recv().is_err());

        match bridge_rx.try_recv().unwrap() {
            BridgeEvent::SettingsUpdated(s) => assert!(!s.show_notifications),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn corrupt_fields_coerced_individually() {
        let raw = r#"{
            "auto_clean_on_threshold": "yes",
            "auto_clean_threshold": 123,
            "monitor_interval_secs": -5,
            "show_notifications": false,
            "unknown_future_field": 1
        }"#;
        let (s, coerced) = Settings::from_json_lenient(raw);
        assert!(!s.auto_clean_on_threshold);
        assert_eq!(s.auto_clean_threshold, 123);
        assert_eq!(s.monitor_interval_secs, 60);
        assert!(!s.show_notifications);
        assert!(coerced.contains(&"auto_clean_on_threshold".to_string()));
        assert!(coerced.contains(&"monitor_interval_secs".to_string()));
        assert!(!coerced.contains(&"auto_clean_threshold".to_string()));
    }

    #[test]
    fn non_object_document_yields_defaults() {
        for raw in ["", "not json", "[1,2,3]", "42"] {
            let (s, coerced) = Settings::from_json_lenient(raw);
            assert_eq!(s, Settings::default(), "input {raw:?}");
            assert!(!coerced.is_empty());
        }
    }

    #[test]
    fn zero_interval_on_disk_is_coerced() {
        let (s, coerced) = Settings::from_json_lenient(r#"{"auto_clean_interval_secs": 0}"#);
        assert_eq!(s.auto_clean_interval_secs, 21_600);
        assert!(coerced.contains(&"auto_clean_interval_secs".to_string()));
    }

    #[test]
    fn open_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, b"{\"debug_mode\": true, \"last_clean_timestamp\": {}}").unwrap();
        let store = SettingsStore::open(&path);
        let s = store.load();
        assert!(s.debug_mode);
        assert_eq!(s.last_clean_timestamp, 0);
    }

    #[test]
    fn reload_picks_up_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.update(|s| s.monitor_interval_secs = 10).unwrap();

        let mut edited = store.load();
        edited.monitor_interval_secs = 99;
        write_json_atomic(store.path(), &edited).unwrap();

        let rx = store.subscribe();
        assert_eq!(store.reload().monitor_interval_secs, 99);
        assert_eq!(rx.try_recv().unwrap().monitor_interval_secs, 99);
    }

    #[test]
    fn update_keeps_edits_from_another_store() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = store_in(dir.path());
        let cli = store_in(dir.path());

        cli.update(|s| s.auto_clean_on_threshold = true).unwrap();
        // The daemon's snapshot predates the edit; its own write must not undo it.
        let committed = daemon.update(|s| s.last_clean_timestamp = 42).unwrap();
        assert!(committed.auto_clean_on_threshold);
        assert_eq!(committed.last_clean_timestamp, 42);

        let on_disk = store_in(dir.path()).load();
        assert!(on_disk.auto_clean_on_threshold);
        assert_eq!(on_disk.last_clean_timestamp, 42);
        assert!(dir.path().join("settings.json.lock").exists());
    }

    #[test]
    fn refresh_adopts_external_edit_once() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = store_in(dir.path());
        let rx = daemon.subscribe();
        assert!(daemon.refresh().is_none());

        store_in(dir.path())
            .update(|s| s.monitor_interval_secs = 5)
            .unwrap();
        let fresh = daemon.refresh().unwrap();
        assert_eq!(fresh.monitor_interval_secs, 5);
        assert_eq!(daemon.load().monitor_interval_secs, 5);
        assert!(daemon.refresh().is_none());
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn rejected_try_update_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let err = store
            .try_update(|s| s.set_field("no_such_key", "1"))
            .unwrap_err();
        assert_eq!(err.code(), "SSW-1004");
        assert!(!store.path().exists());

        let committed = store
            .try_update(|s| s.set_field("debug_mode", "true"))
            .unwrap();
        assert!(committed.debug_mode);
    }

    #[test]
    fn set_field_parses_by_type() {
        let mut s = Settings::default();
        s.set_field("auto_clean_scheduled", "true").unwrap();
        s.set_field("auto_clean_interval_secs", "3600").unwrap();
        assert!(s.auto_clean_scheduled);
        assert_eq!(s.auto_clean_interval_secs, 3600);

        assert!(s.set_field("nope", "1").is_err());
        assert!(s.set_field("debug_mode", "maybe").is_err());
        // Out of range for u32.
        assert!(s.set_field("monitor_interval_secs", "99999999999").is_err());
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(store_in(dir.path()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        store
                            .update(|s| s.debug_simulated_size += 1)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load().debug_simulated_size, 40);
        assert_eq!(store_in(dir.path()).load().debug_simulated_size, 40);
    }
}
