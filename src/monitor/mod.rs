//! Cache monitoring: severity classification, status snapshots, volume stats.

pub mod classifier;
pub mod fs_stats;
pub mod status;
