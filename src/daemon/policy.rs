//! Auto-clean policy: decides, once per monitor tick, whether to start an
//! unattended clean.
//!
//! Two independent triggers, both opt-in through settings:
//! - **threshold**: edge-triggered on the measured total crossing
//!   `auto_clean_threshold` from below. Staying above does not re-fire.
//! - **schedule**: fires when `auto_clean_interval_secs` have elapsed since
//!   `last_clean_timestamp`.
//!
//! At most one trigger is returned per tick; threshold wins.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::settings::Settings;
use crate::monitor::status::CacheStatus;
use crate::scanner::deletion::CleanTrigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoCleanTrigger {
    Threshold,
    Schedule,
}

impl AutoCleanTrigger {
    pub const fn as_clean_trigger(self) -> CleanTrigger {
        match self {
            Self::Threshold => CleanTrigger::Threshold,
            Self::Schedule => CleanTrigger::Schedule,
        }
    }
}

impl fmt::Display for AutoCleanTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_clean_trigger().as_str())
    }
}

/// Edge-detector state for the threshold trigger.
#[derive(Debug, Default)]
pub struct AutoCleanPolicy {
    /// Total seen on the previous observation. `None` before the first tick,
    /// which counts as "below".
    last_total: Option<u64>,
}

impl AutoCleanPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one tick. Always records `status` as the latest observation.
    pub fn evaluate(
        &mut self,
        status: &CacheStatus,
        settings: &Settings,
        now: u64,
    ) -> Option<AutoCleanTrigger> {
        // Compared against the current threshold so lowering it re-arms.
        let threshold = settings.auto_clean_threshold;
        let was_below = self.last_total.is_none_or(|prev| prev < threshold);
        let is_above = status.total_bytes >= threshold;
        self.last_total = Some(status.total_bytes);

        if settings.auto_clean_on_threshold && is_above && was_below {
            return Some(AutoCleanTrigger::Threshold);
        }
        if settings.auto_clean_scheduled && schedule_due(settings, now) {
            return Some(AutoCleanTrigger::Schedule);
        }
        None
    }

    /// Record a status without evaluating, e.g. the re-measurement after a clean.
    pub fn observe(&mut self, status: &CacheStatus) {
        self.last_total = Some(status.total_bytes);
    }

    pub fn last_observed(&self) -> Option<u64> {
        self.last_total
    }
}

/// Whether the scheduled interval has elapsed. A clock that went backwards
/// counts as zero elapsed.
pub fn schedule_due(settings: &Settings, now: u64) -> bool {
    now.saturating_sub(settings.last_clean_timestamp) >= u64::from(settings.auto_clean_interval_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::classifier::Thresholds;
    use std::path::Path;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn status(bytes: u64) -> CacheStatus {
        CacheStatus::simulated(Path::new("/c"), true, bytes, &Thresholds::default())
    }

    fn threshold_settings() -> Settings {
        Settings {
            auto_clean_on_threshold: true,
            auto_clean_threshold: 5 * GIB,
            ..Settings::default()
        }
    }

    #[test]
    fn disabled_triggers_never_fire() {
        let mut policy = AutoCleanPolicy::new();
        let settings = Settings::default();
        assert_eq!(policy.evaluate(&status(11 * GIB), &settings, 1_000_000), None);
    }

    #[test]
    fn first_observation_above_fires() {
        let mut policy = AutoCleanPolicy::new();
        assert_eq!(
            policy.evaluate(&status(6 * GIB), &threshold_settings(), 0),
            Some(AutoCleanTrigger::Threshold)
        );
    }

    #[test]
    fn threshold_is_edge_triggered() {
        let mut policy = AutoCleanPolicy::new();
        let s = threshold_settings();
        assert_eq!(policy.evaluate(&status(2 * GIB), &s, 0), None);
        assert_eq!(
            policy.evaluate(&status(6 * GIB), &s, 0),
            Some(AutoCleanTrigger::Threshold)
        );
        // Clean failed and the cache stayed above: no re-fire.
        assert_eq!(policy.evaluate(&status(6 * GIB), &s, 0), None);
        assert_eq!(policy.evaluate(&status(11 * GIB), &s, 0), None);
        // Dropping below re-arms.
        assert_eq!(policy.evaluate(&status(GIB), &s, 0), None);
        assert_eq!(
            policy.evaluate(&status(5 * GIB), &s, 0),
            Some(AutoCleanTrigger::Threshold)
        );
    }

    #[test]
    fn observe_after_clean_rearms() {
        let mut policy = AutoCleanPolicy::new();
        let s = threshold_settings();
        assert!(policy.evaluate(&status(6 * GIB), &s, 0).is_some());
        policy.observe(&status(0));
        assert_eq!(policy.last_observed(), Some(0));
        assert!(policy.evaluate(&status(7 * GIB), &s, 0).is_some());
    }

    #[test]
    fn lowered_threshold_fires_on_next_tick() {
        let mut policy = AutoCleanPolicy::new();
        let mut s = threshold_settings();
        assert_eq!(policy.evaluate(&status(3 * GIB), &s, 0), None);
        s.auto_clean_threshold = 2 * GIB;
        assert_eq!(
            policy.evaluate(&status(3 * GIB), &s, 0),
            Some(AutoCleanTrigger::Threshold)
        );
    }

    #[test]
    fn schedule_fires_when_interval_elapsed() {
        let mut policy = AutoCleanPolicy::new();
        let s = Settings {
            auto_clean_scheduled: true,
            auto_clean_interval_secs: 3600,
            last_clean_timestamp: 10_000,
            ..Settings::default()
        };
        assert_eq!(policy.evaluate(&status(0), &s, 10_000 + 3599), None);
        assert_eq!(
            policy.evaluate(&status(0), &s, 10_000 + 3600),
            Some(AutoCleanTrigger::Schedule)
        );
    }

    #[test]
    fn schedule_saturates_on_clock_skew() {
        let s = Settings {
            auto_clean_scheduled: true,
            auto_clean_interval_secs: 60,
            last_clean_timestamp: 5_000,
            ..Settings::default()
        };
        assert!(!schedule_due(&s, 100));
    }

    #[test]
    fn never_cleaned_schedule_is_due() {
        let s = Settings {
            auto_clean_scheduled: true,
            ..Settings::default()
        };
        assert!(schedule_due(&s, u64::from(s.auto_clean_interval_secs)));
    }

    #[test]
    fn threshold_wins_over_schedule() {
        let mut policy = AutoCleanPolicy::new();
        let s = Settings {
            auto_clean_scheduled: true,
            auto_clean_interval_secs: 1,
            ..threshold_settings()
        };
        assert_eq!(
            policy.evaluate(&status(6 * GIB), &s, 1_000_000),
            Some(AutoCleanTrigger::Threshold)
        );
        assert_eq!(
            policy.evaluate(&status(6 * GIB), &s, 1_000_000),
            Some(AutoCleanTrigger::Schedule)
        );
    }
}
