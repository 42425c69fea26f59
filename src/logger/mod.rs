//! Logging: human-readable audit log plus dual-write structured activity
//! (JSONL append-only, SQLite in WAL mode) with graceful degradation.

pub mod audit;
pub mod dual;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "sqlite")]
pub mod stats;
