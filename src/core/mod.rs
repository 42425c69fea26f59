//! Core types: errors, configuration, user settings, shared helpers.

pub mod config;
pub mod errors;
pub mod format;
pub mod paths;
pub mod persist;
pub mod settings;
