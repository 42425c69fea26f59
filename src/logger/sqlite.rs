//! SQLite activity store: WAL-mode database behind `history` and the stats windows.
//!
//! Three tables: `activity_log` (every structured event), `clean_history`
//! (one row per clean or dry run) and `size_history` (one row per measurement).

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{Result, SweepError};

pub struct SqliteLogger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLogger {
    /// Open (or create) the database, applying PRAGMAs and schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ──────────────────── activity_log ────────────────────

    pub fn log_activity(&self, row: &ActivityRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO activity_log (
                timestamp, event_type, severity, path, size_bytes, total_bytes,
                cache_state, trigger, duration_ms, success, error_code,
                error_message, details
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.path,
                row.size_bytes,
                row.total_bytes,
                row.cache_state,
                row.trigger,
                row.duration_ms,
                row.success,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    /// Newest first.
    pub fn recent_activity(&self, limit: u32) -> Result<Vec<ActivityRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, event_type, severity, path, size_bytes, total_bytes,
                    cache_state, trigger, duration_ms, success, error_code,
                    error_message, details
             FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ActivityRow {
                    timestamp: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    path: row.get(3)?,
                    size_bytes: row.get(4)?,
                    total_bytes: row.get(5)?,
                    cache_state: row.get(6)?,
                    trigger: row.get(7)?,
                    duration_ms: row.get(8)?,
                    success: row.get(9)?,
                    error_code: row.get(10)?,
                    error_message: row.get(11)?,
                    details: row.get(12)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ──────────────────── clean_history ────────────────────

    pub fn log_clean(&self, row: &CleanRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO clean_history (
                timestamp, trigger, dry_run, success, bytes_freed,
                items_removed, items_failed, duration_ms, message
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            )?
            .execute(params![
                row.timestamp,
                row.trigger,
                row.dry_run,
                row.success,
                row.bytes_freed,
                row.items_removed,
                row.items_failed,
                row.duration_ms,
                row.message,
            ])?;
        Ok(())
    }

    /// Newest first.
    pub fn recent_cleans(&self, limit: u32) -> Result<Vec<CleanRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, trigger, dry_run, success, bytes_freed,
                    items_removed, items_failed, duration_ms, message
             FROM clean_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(CleanRow {
                    timestamp: row.get(0)?,
                    trigger: row.get(1)?,
                    dry_run: row.get(2)?,
                    success: row.get(3)?,
                    bytes_freed: row.get(4)?,
                    items_removed: row.get(5)?,
                    items_failed: row.get(6)?,
                    duration_ms: row.get(7)?,
                    message: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ──────────────────── size_history ────────────────────

    pub fn log_size(&self, row: &SizeRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO size_history (
                timestamp, total_bytes, cache_state, item_count, simulated
            ) VALUES (?1,?2,?3,?4,?5)",
            )?
            .execute(params![
                row.timestamp,
                row.total_bytes,
                row.cache_state,
                row.item_count,
                row.simulated,
            ])?;
        Ok(())
    }

    /// Samples at or after `since`, newest first.
    pub fn sizes_since(&self, since: &str, limit: u32) -> Result<Vec<SizeRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, total_bytes, cache_state, item_count, simulated
             FROM size_history WHERE timestamp >= ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![since, limit], |row| {
                Ok(SizeRow {
                    timestamp: row.get(0)?,
                    total_bytes: row.get(1)?,
                    cache_state: row.get(2)?,
                    item_count: row.get(3)?,
                    simulated: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ──────────────────── retention ────────────────────

    /// Delete rows older than `retention_days` from every table.
    pub fn prune(&self, retention_days: u32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let cutoff_str = cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let mut deleted = 0;
        for table in ["activity_log", "clean_history", "size_history"] {
            deleted += self.conn.execute(
                &format!("DELETE FROM {table} WHERE timestamp < ?1"),
                params![cutoff_str],
            )?;
        }
        Ok(deleted)
    }

    // ──────────────────── aggregate helpers ────────────────────

    pub fn count_events_since(&self, event_type: &str, since: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE event_type = ?1 AND timestamp >= ?2",
            params![event_type, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Bytes removed by real (non dry-run) cleans since a timestamp.
    pub fn bytes_freed_since(&self, since: &str) -> Result<i64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(bytes_freed), 0) FROM clean_history
             WHERE dry_run = 0 AND timestamp >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

// ──────────────────── row types ────────────────────

#[derive(Debug, Clone, Default)]
pub struct ActivityRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub path: Option<String>,
    pub size_bytes: Option<i64>,
    pub total_bytes: Option<i64>,
    pub cache_state: Option<String>,
    pub trigger: Option<String>,
    pub duration_ms: Option<i64>,
    pub success: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CleanRow {
    pub timestamp: String,
    pub trigger: String,
    pub dry_run: bool,
    pub success: bool,
    pub bytes_freed: i64,
    pub items_removed: i64,
    pub items_failed: i64,
    pub duration_ms: i64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SizeRow {
    pub timestamp: String,
    pub total_bytes: i64,
    pub cache_state: String,
    pub item_count: i64,
    pub simulated: bool,
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -2000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[SSW-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            path TEXT,
            size_bytes INTEGER,
            total_bytes INTEGER,
            cache_state TEXT,
            trigger TEXT,
            duration_ms INTEGER,
            success INTEGER NOT NULL DEFAULT 1,
            error_code TEXT,
            error_message TEXT,
            details TEXT
        );

        CREATE TABLE IF NOT EXISTS clean_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            trigger TEXT NOT NULL,
            dry_run INTEGER NOT NULL,
            success INTEGER NOT NULL,
            bytes_freed INTEGER NOT NULL,
            items_removed INTEGER NOT NULL,
            items_failed INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL,
            message TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS size_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            total_bytes INTEGER NOT NULL,
            cache_state TEXT NOT NULL,
            item_count INTEGER NOT NULL,
            simulated INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_activity_type_time ON activity_log(event_type, timestamp);
        CREATE INDEX IF NOT EXISTS idx_clean_timestamp ON clean_history(timestamp);
        CREATE INDEX IF NOT EXISTS idx_size_timestamp ON size_history(timestamp);",
    )?;
    Ok(())
}
