//! Dual-write coordinator: JSONL always, SQLite when available.
//!
//! A dedicated logger thread owns the `JsonlWriter` and `SqliteLogger`. Other
//! threads send `ActivityEvent`s through a bounded crossbeam channel with
//! `try_send()`, so a slow disk never stalls the monitor or a clean.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::Config;
use crate::core::errors::{Result, SweepError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ActivityRow, CleanRow, SizeRow, SqliteLogger};

const CHANNEL_CAPACITY: usize = 1024;

/// Consecutive SQLite failures before the backend is dropped.
#[cfg(feature = "sqlite")]
const SQLITE_FAILURE_LIMIT: u32 = 3;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        target: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    ScanCompleted {
        total_bytes: u64,
        state: String,
        item_count: u32,
        unreadable_entries: u64,
        simulated: bool,
        duration_ms: u64,
    },
    StateChanged {
        from: String,
        to: String,
        total_bytes: u64,
    },
    ItemDeleted {
        path: String,
        size_bytes: u64,
        is_directory: bool,
        duration_ms: u64,
    },
    ItemDeletionFailed {
        path: String,
        error_code: String,
        error_message: String,
    },
    CleanCompleted {
        trigger: String,
        dry_run: bool,
        success: bool,
        bytes_freed: u64,
        items_removed: u32,
        items_failed: u32,
        duration_ms: u64,
        message: String,
    },
    AutoCleanTriggered {
        trigger: String,
        total_bytes: u64,
    },
    SettingsReloaded {
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Asks the logger thread to flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply cloneable sender side of the logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Non-blocking. A full channel drops the event and bumps the counter.
    pub fn send(&self, event: ActivityEvent) {
        let _ = self.try_send(event);
    }

    /// Like [`send`](Self::send), but reports a logger thread that has exited.
    pub fn try_send(&self, event: ActivityEvent) -> Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(SweepError::ChannelClosed {
                component: "activity-logger",
            }),
        }
    }

    /// Events dropped since the logger thread last reported them.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Blocking send of the shutdown sentinel.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

pub struct DualLoggerConfig {
    /// `None` disables SQLite.
    pub sqlite_path: Option<PathBuf>,
    pub sqlite_retention_days: u32,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for DualLoggerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl DualLoggerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sqlite_path: Some(config.paths.sqlite_db.clone()),
            sqlite_retention_days: config.logging.sqlite_retention_days,
            jsonl_config: JsonlConfig {
                path: config.paths.jsonl_log.clone(),
                fallback_path: Some(std::env::temp_dir().join("symsweep-activity.jsonl")),
                max_size_bytes: config.logging.jsonl_max_size_bytes,
                max_rotated_files: config.logging.jsonl_max_rotated_files,
                fsync_interval_secs: config.logging.jsonl_fsync_interval_secs,
            },
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread. It runs until `shutdown()` or every handle is dropped.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("ssw-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped_clone))
        .map_err(|e| SweepError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: DualLoggerConfig, dropped: &AtomicU64) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = config
        .sqlite_path
        .as_ref()
        .and_then(|p| match SqliteLogger::open(p) {
            Ok(db) => {
                if let Err(e) = db.prune(config.sqlite_retention_days) {
                    eprintln!("[SSW-DUAL] SQLite prune failed: {e}");
                }
                Some(db)
            }
            Err(e) => {
                eprintln!("[SSW-DUAL] failed to open SQLite at {}: {e}", p.display());
                None
            }
        });

    let mut jsonl = JsonlWriter::open(config.jsonl_config);
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));

        #[cfg(feature = "sqlite")]
        if let Some(db) = &sqlite {
            if write_sqlite(db, &event) {
                sqlite_failures = 0;
            } else {
                sqlite_failures += 1;
                if sqlite_failures >= SQLITE_FAILURE_LIMIT {
                    eprintln!("[SSW-DUAL] SQLite write failed {sqlite_failures} times, disabling");
                    sqlite = None;
                }
            }
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

/// True when every row for this event was stored.
#[cfg(feature = "sqlite")]
fn write_sqlite(db: &SqliteLogger, event: &ActivityEvent) -> bool {
    let activity_ok = event_to_activity_row(event)
        .as_ref()
        .is_none_or(|row| db.log_activity(row).is_ok());
    let clean_ok = event_to_clean_row(event)
        .as_ref()
        .is_none_or(|row| db.log_clean(row).is_ok());
    let size_ok = event_to_size_row(event)
        .as_ref()
        .is_none_or(|row| db.log_size(row).is_ok());
    activity_ok && clean_ok && size_ok
}

// ──────────────────── event conversion ────────────────────

fn event_type(event: &ActivityEvent) -> (EventType, Severity) {
    match event {
        ActivityEvent::DaemonStarted { .. } => (EventType::DaemonStart, Severity::Info),
        ActivityEvent::DaemonStopped { .. } | ActivityEvent::Shutdown => {
            (EventType::DaemonStop, Severity::Info)
        }
        ActivityEvent::ScanCompleted { .. } => (EventType::CacheScan, Severity::Info),
        ActivityEvent::StateChanged { to, .. } => {
            let severity = match to.as_str() {
                "critical" => Severity::Critical,
                "warning" => Severity::Warning,
                _ => Severity::Info,
            };
            (EventType::StateChange, severity)
        }
        ActivityEvent::ItemDeleted { .. } => (EventType::ItemDelete, Severity::Info),
        ActivityEvent::ItemDeletionFailed { .. } => {
            (EventType::ItemDeleteFailed, Severity::Warning)
        }
        ActivityEvent::CleanCompleted { success, .. } => (
            EventType::CleanComplete,
            if *success {
                Severity::Info
            } else {
                Severity::Warning
            },
        ),
        ActivityEvent::AutoCleanTriggered { .. } => (EventType::AutoCleanTrigger, Severity::Info),
        ActivityEvent::SettingsReloaded { .. } => (EventType::SettingsReload, Severity::Info),
        ActivityEvent::Error { .. } => (EventType::Error, Severity::Critical),
    }
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    let (kind, severity) = event_type(event);
    let mut e = LogEntry::new(kind, severity);
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            target,
        } => {
            e.path = Some(target.clone());
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
        }
        ActivityEvent::ScanCompleted {
            total_bytes,
            state,
            item_count,
            unreadable_entries,
            simulated,
            duration_ms,
        } => {
            e.total_bytes = Some(*total_bytes);
            e.state = Some(state.clone());
            e.items = Some(u64::from(*item_count));
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            if *simulated || *unreadable_entries > 0 {
                e.details = Some(format!(
                    "simulated={simulated} unreadable={unreadable_entries}"
                ));
            }
        }
        ActivityEvent::StateChanged {
            from,
            to,
            total_bytes,
        } => {
            e.previous_state = Some(from.clone());
            e.state = Some(to.clone());
            e.total_bytes = Some(*total_bytes);
        }
        ActivityEvent::ItemDeleted {
            path,
            size_bytes,
            is_directory,
            duration_ms,
        } => {
            e.path = Some(path.clone());
            e.size = Some(*size_bytes);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e.details = Some(if *is_directory { "directory" } else { "file" }.to_string());
        }
        ActivityEvent::ItemDeletionFailed {
            path,
            error_code,
            error_message,
        } => {
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
        }
        ActivityEvent::CleanCompleted {
            trigger,
            dry_run,
            success,
            bytes_freed,
            items_removed,
            items_failed,
            duration_ms,
            message,
        } => {
            e.trigger = Some(trigger.clone());
            e.dry_run = Some(*dry_run);
            e.ok = Some(*success);
            e.size = Some(*bytes_freed);
            e.items = Some(u64::from(*items_removed));
            e.duration_ms = Some(*duration_ms);
            e.details = Some(if *items_failed > 0 {
                format!("{message}; failed={items_failed}")
            } else {
                message.clone()
            });
        }
        ActivityEvent::AutoCleanTriggered {
            trigger,
            total_bytes,
        } => {
            e.trigger = Some(trigger.clone());
            e.total_bytes = Some(*total_bytes);
        }
        ActivityEvent::SettingsReloaded { details } => {
            e.details = Some(details.clone());
            e.ok = Some(true);
        }
        ActivityEvent::Error { code, message } => {
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
        }
        ActivityEvent::Shutdown => {}
    }
    e
}

#[cfg(feature = "sqlite")]
fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(feature = "sqlite")]
fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Every event except `Shutdown` lands in `activity_log`, mirroring the JSONL line.
#[cfg(feature = "sqlite")]
fn event_to_activity_row(event: &ActivityEvent) -> Option<ActivityRow> {
    if matches!(event, ActivityEvent::Shutdown) {
        return None;
    }
    let entry = event_to_log_entry(event);
    let event_type = serde_json::to_value(entry.event)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let severity = serde_json::to_value(entry.severity)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    Some(ActivityRow {
        timestamp: entry.ts,
        event_type,
        severity,
        path: entry.path,
        size_bytes: entry.size.map(to_i64),
        total_bytes: entry.total_bytes.map(to_i64),
        cache_state: entry.state,
        trigger: entry.trigger,
        duration_ms: entry.duration_ms.map(to_i64),
        success: i32::from(entry.ok.unwrap_or(true)),
        error_code: entry.error_code,
        error_message: entry.error_message,
        details: entry.details,
    })
}

#[cfg(feature = "sqlite")]
fn event_to_clean_row(event: &ActivityEvent) -> Option<CleanRow> {
    match event {
        ActivityEvent::CleanCompleted {
            trigger,
            dry_run,
            success,
            bytes_freed,
            items_removed,
            items_failed,
            duration_ms,
            message,
        } => Some(CleanRow {
            timestamp: now_ts(),
            trigger: trigger.clone(),
            dry_run: *dry_run,
            success: *success,
            bytes_freed: to_i64(*bytes_freed),
            items_removed: i64::from(*items_removed),
            items_failed: i64::from(*items_failed),
            duration_ms: to_i64(*duration_ms),
            message: message.clone(),
        }),
        _ => None,
    }
}

#[cfg(feature = "sqlite")]
fn event_to_size_row(event: &ActivityEvent) -> Option<SizeRow> {
    match event {
        ActivityEvent::ScanCompleted {
            total_bytes,
            state,
            item_count,
            simulated,
            ..
        } => Some(SizeRow {
            timestamp: now_ts(),
            total_bytes: to_i64(*total_bytes),
            cache_state: state.clone(),
            item_count: i64::from(*item_count),
            simulated: *simulated,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path, sqlite: bool) -> DualLoggerConfig {
        DualLoggerConfig {
            sqlite_path: sqlite.then(|| dir.join("activity.sqlite3")),
            sqlite_retention_days: 90,
            jsonl_config: JsonlConfig {
                path: dir.join("activity.jsonl"),
                fallback_path: None,
                max_size_bytes: 10 * 1024 * 1024,
                max_rotated_files: 3,
                fsync_interval_secs: 60,
            },
            channel_capacity: 64,
        }
    }

    fn clean_event(dry_run: bool, bytes: u64) -> ActivityEvent {
        ActivityEvent::CleanCompleted {
            trigger: "manual".to_string(),
            dry_run,
            success: true,
            bytes_freed: bytes,
            items_removed: 2,
            items_failed: 0,
            duration_ms: 4,
            message: "Cleaned".to_string(),
        }
    }

    #[test]
    fn spawn_and_shutdown_flushes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), false)).unwrap();
        handle.send(ActivityEvent::DaemonStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc".to_string(),
            target: "/c".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("daemon_start"));
    }

    #[test]
    fn send_after_logger_exit_reports_channel_closed() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), false)).unwrap();
        handle.shutdown();
        join.join().unwrap();

        let err = handle.try_send(clean_event(true, 1)).unwrap_err();
        assert_eq!(err.code(), "SSW-3003");
        // The fire-and-forget path stays silent.
        handle.send(clean_event(true, 1));
        assert_eq!(handle.dropped_events(), 0);
    }

    #[test]
    fn clones_share_one_writer() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), false)).unwrap();
        let other = handle.clone();
        handle.send(clean_event(true, 10));
        other.send(ActivityEvent::Error {
            code: "SSW-3002".to_string(),
            message: "io".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("SSW-3002"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_receives_cleans_sizes_and_activity() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), true)).unwrap();
        handle.send(ActivityEvent::ScanCompleted {
            total_bytes: 6,
            state: "warning".to_string(),
            item_count: 1,
            unreadable_entries: 0,
            simulated: true,
            duration_ms: 1,
        });
        handle.send(clean_event(false, 600));
        handle.send(clean_event(true, 9_999));
        handle.shutdown();
        join.join().unwrap();

        let db = SqliteLogger::open(&dir.path().join("activity.sqlite3")).unwrap();
        assert_eq!(db.recent_cleans(10).unwrap().len(), 2);
        assert_eq!(db.bytes_freed_since("").unwrap(), 600);
        assert_eq!(db.sizes_since("", 10).unwrap().len(), 1);
        assert_eq!(db.count_events_since("clean_complete", "").unwrap(), 2);
        assert_eq!(db.count_events_since("cache_scan", "").unwrap(), 1);
    }

    #[test]
    fn failed_deletion_maps_to_warning() {
        let entry = event_to_log_entry(&ActivityEvent::ItemDeletionFailed {
            path: "/c/x".to_string(),
            error_code: "SSW-3001".to_string(),
            error_message: "denied".to_string(),
        });
        assert_eq!(entry.event, EventType::ItemDeleteFailed);
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.ok, Some(false));
    }

    #[test]
    fn state_change_severity_follows_target_state() {
        let entry = event_to_log_entry(&ActivityEvent::StateChanged {
            from: "warning".to_string(),
            to: "critical".to_string(),
            total_bytes: 11,
        });
        assert_eq!(entry.severity, Severity::Critical);
        assert_eq!(entry.previous_state.as_deref(), Some("warning"));
    }

    #[test]
    fn dropped_counter_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), false);
        config.channel_capacity = 1;
        let (handle, join) = spawn_logger(config).unwrap();
        assert_eq!(handle.dropped_events(), 0);
        handle.shutdown();
        join.join().unwrap();
    }
}
