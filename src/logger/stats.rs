//! Stats query engine: time-window aggregation for the `history` command.
//!
//! A read-only view over `clean_history`, `size_history` and `activity_log`.

#![allow(missing_docs)]

use std::time::Duration;

use rusqlite::params;

use crate::core::errors::Result;
use crate::logger::sqlite::SqliteLogger;
use crate::monitor::classifier::CacheState;

// ──────────────────── standard time windows ────────────────────

pub const STANDARD_WINDOWS: &[Duration] = &[
    Duration::from_secs(60 * 60),           // 1 hour
    Duration::from_secs(24 * 60 * 60),      // 24 hours
    Duration::from_secs(7 * 24 * 60 * 60),  // 7 days
    Duration::from_secs(30 * 24 * 60 * 60), // 30 days
];

// ──────────────────── stat types ────────────────────

#[derive(Debug, Clone)]
pub struct WindowStats {
    pub window: Duration,
    pub cleans: CleanStats,
    pub size: SizeStats,
}

/// Real cleans only; dry runs are counted separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub count: u64,
    /// Cleans started by the threshold or schedule trigger.
    pub automatic: u64,
    pub dry_runs: u64,
    pub bytes_freed: u64,
    pub items_removed: u64,
    /// Items that could not be removed.
    pub item_failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeStats {
    pub samples: u64,
    pub peak_bytes: u64,
    pub latest_bytes: Option<u64>,
    pub latest_state: Option<CacheState>,
    pub worst_state: CacheState,
    pub transitions: u64,
}

// ──────────────────── stats engine ────────────────────

pub struct StatsEngine<'a> {
    db: &'a SqliteLogger,
}

impl<'a> StatsEngine<'a> {
    pub fn new(db: &'a SqliteLogger) -> Self {
        Self { db }
    }

    /// Stats for every standard window.
    pub fn summary(&self) -> Result<Vec<WindowStats>> {
        STANDARD_WINDOWS
            .iter()
            .map(|&w| self.window_stats(w))
            .collect()
    }

    pub fn window_stats(&self, window: Duration) -> Result<WindowStats> {
        let since = since_timestamp(window);
        Ok(WindowStats {
            window,
            cleans: self.clean_stats(&since)?,
            size: self.size_stats(&since)?,
        })
    }

    pub fn export_json(&self) -> Result<serde_json::Value> {
        let windows = self.summary()?;
        let json_windows: Vec<serde_json::Value> = windows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "window_secs": w.window.as_secs(),
                    "window_label": window_label(w.window),
                    "cleans": {
                        "count": w.cleans.count,
                        "automatic": w.cleans.automatic,
                        "dry_runs": w.cleans.dry_runs,
                        "bytes_freed": w.cleans.bytes_freed,
                        "items_removed": w.cleans.items_removed,
                        "item_failures": w.cleans.item_failures,
                    },
                    "size": {
                        "samples": w.size.samples,
                        "peak_bytes": w.size.peak_bytes,
                        "latest_bytes": w.size.latest_bytes,
                        "latest_state": w.size.latest_state.map(CacheState::as_str),
                        "worst_state": w.size.worst_state.as_str(),
                        "transitions": w.size.transitions,
                    },
                })
            })
            .collect();
        Ok(serde_json::json!({ "windows": json_windows }))
    }

    // ──────────────────── private helpers ────────────────────

    #[allow(clippy::cast_sign_loss)]
    fn clean_stats(&self, since: &str) -> Result<CleanStats> {
        let conn = self.db.connection();
        let (count, automatic, bytes, items, failures): (i64, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(trigger != 'manual'), 0),
                    COALESCE(SUM(bytes_freed), 0),
                    COALESCE(SUM(items_removed), 0),
                    COALESCE(SUM(items_failed), 0)
                 FROM clean_history
                 WHERE dry_run = 0 AND timestamp >= ?1",
                params![since],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )?;
        let dry_runs: i64 = conn.query_row(
            "SELECT COUNT(*) FROM clean_history WHERE dry_run = 1 AND timestamp >= ?1",
            params![since],
            |row| row.get(0),
        )?;

        Ok(CleanStats {
            count: count.max(0) as u64,
            automatic: automatic.max(0) as u64,
            dry_runs: dry_runs.max(0) as u64,
            bytes_freed: bytes.max(0) as u64,
            items_removed: items.max(0) as u64,
            item_failures: failures.max(0) as u64,
        })
    }

    #[allow(clippy::cast_sign_loss)]
    fn size_stats(&self, since: &str) -> Result<SizeStats> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT total_bytes, cache_state FROM size_history
             WHERE timestamp >= ?1 ORDER BY id ASC",
        )?;
        let samples = stmt
            .query_map(params![since], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stats = SizeStats::default();
        let mut previous: Option<CacheState> = None;
        for (bytes, state_label) in samples {
            let bytes = bytes.max(0) as u64;
            let state = parse_state(&state_label);
            stats.samples += 1;
            stats.peak_bytes = stats.peak_bytes.max(bytes);
            stats.worst_state = stats.worst_state.max(state);
            if previous.is_some_and(|p| p != state) {
                stats.transitions += 1;
            }
            previous = Some(state);
            stats.latest_bytes = Some(bytes);
            stats.latest_state = Some(state);
        }
        Ok(stats)
    }
}

// ──────────────────── utility functions ────────────────────

#[allow(clippy::cast_possible_wrap)]
fn since_timestamp(window: Duration) -> String {
    let since = chrono::Utc::now() - chrono::Duration::seconds(window.as_secs() as i64);
    since.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn parse_state(label: &str) -> CacheState {
    match label {
        "critical" => CacheState::Critical,
        "warning" => CacheState::Warning,
        _ => CacheState::Normal,
    }
}

/// `"1 hour"`, `"7 days"`.
pub fn window_label(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 3600 {
        format!("{} min", secs / 60)
    } else if secs < 86400 {
        let h = secs / 3600;
        if h == 1 {
            "1 hour".to_string()
        } else {
            format!("{h} hours")
        }
    } else {
        let d = secs / 86400;
        if d == 1 {
            "1 day".to_string()
        } else {
            format!("{d} days")
        }
    }
}
