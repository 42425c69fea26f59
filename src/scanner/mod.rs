//! Cache scanner and clean executor.

pub mod deletion;
pub mod walker;
