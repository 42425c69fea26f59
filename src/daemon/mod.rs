//! Daemon subsystem: command surface, event bus, auto-clean policy, monitor
//! loop and signal handling.

pub mod bridge;
pub mod events;
#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod policy;
#[cfg(feature = "daemon")]
pub mod signals;
