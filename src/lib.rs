#![forbid(unsafe_code)]

//! SymbolSweep (symsweep): keeps the `com.apple.coresymbolicationd` symbol
//! cache from growing unbounded.
//!
//! The background monitor measures the cache directory on an interval,
//! classifies it as normal / warning / critical, runs threshold and scheduled
//! auto-cleans, and publishes status to any number of front ends. Every
//! deletion is written to a human-readable audit log.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use symbol_sweep::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use symbol_sweep::core::config::Config;
//! use symbol_sweep::daemon::bridge::{CacheCommands, CacheService};
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod scanner;
