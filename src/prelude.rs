//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use symbol_sweep::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SweepError};
pub use crate::core::settings::{Settings, SettingsStore};

// Monitor
pub use crate::monitor::classifier::{CacheState, Thresholds};
pub use crate::monitor::status::CacheStatus;

// Scanner
pub use crate::scanner::deletion::{CleanExecutor, CleanResult, CleanTrigger};
pub use crate::scanner::walker::{DeletionItem, SizeScanner};

// Daemon
pub use crate::daemon::bridge::{CacheCommands, CacheService};
pub use crate::daemon::events::{BridgeEvent, EventBus};
pub use crate::daemon::policy::{AutoCleanPolicy, AutoCleanTrigger};
