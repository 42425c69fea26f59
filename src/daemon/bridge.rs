//! Command surface shared by every presentation layer.
//!
//! [`CacheCommands`] is the whole boundary: a front end calls these methods and
//! listens on [`BridgeEvent`]s. [`CacheService`] implements it over the scanner,
//! the clean executor and the settings store.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::format::{time_since, unix_now};
use crate::core::settings::{Settings, SettingsStore};
use crate::daemon::events::{BridgeEvent, EventBus};
use crate::logger::audit::AuditLog;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::classifier::Thresholds;
use crate::monitor::fs_stats::volume_stats;
use crate::monitor::status::CacheStatus;
use crate::scanner::deletion::{CleanExecutor, CleanResult, CleanTrigger};
use crate::scanner::walker::SizeScanner;

/// Operations a front end may invoke.
pub trait CacheCommands: Send + Sync {
    /// Fresh measurement. Honors debug mode.
    fn get_status(&self) -> CacheStatus;

    /// Clean now. Fails with `CleanInProgress` while another clean runs.
    fn clean(&self, dry_run: bool) -> Result<CleanResult>;

    /// `"Never"` or `"<duration> ago"`.
    fn get_last_clean_time(&self) -> String;

    fn get_settings(&self) -> Settings;

    fn update_settings(&self, settings: Settings) -> Result<()>;

    /// Stream of status, settings and auto-clean events.
    fn subscribe(&self) -> Receiver<BridgeEvent>;

    /// Location of the human-readable deletions log.
    fn log_path(&self) -> PathBuf;
}

/// Default [`CacheCommands`] implementation.
pub struct CacheService {
    config: Config,
    thresholds: Thresholds,
    scanner: SizeScanner,
    settings: Arc<SettingsStore>,
    executor: CleanExecutor,
    bus: EventBus<BridgeEvent>,
    logger: Option<ActivityLoggerHandle>,
}

impl CacheService {
    /// Wire the service from configuration. Settings are read from disk here.
    pub fn new(config: Config, logger: Option<ActivityLoggerHandle>) -> Self {
        let bus = EventBus::new(config.events.channel_capacity);
        let settings = Arc::new(
            SettingsStore::open(&config.paths.settings_file).with_bridge(bus.clone()),
        );
        let scanner = SizeScanner::new(&config.target.path, config.scanner.parallelism);
        let executor = CleanExecutor::new(
            scanner.clone(),
            Arc::clone(&settings),
            AuditLog::new(&config.paths.audit_log),
            logger.clone(),
        );
        Self {
            thresholds: Thresholds::from(&config.thresholds),
            config,
            scanner,
            settings,
            executor,
            bus,
            logger,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn settings_store(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn executor(&self) -> &CleanExecutor {
        &self.executor
    }

    pub fn bus(&self) -> &EventBus<BridgeEvent> {
        &self.bus
    }

    pub fn logger(&self) -> Option<&ActivityLoggerHandle> {
        self.logger.as_ref()
    }

    /// Measure the cache, or synthesize a status in debug mode.
    pub fn measure(&self) -> CacheStatus {
        let settings = self.settings.load();
        let target = self.scanner.root();
        let started = std::time::Instant::now();

        let (status, unreadable) = if settings.debug_mode {
            (
                CacheStatus::simulated(
                    target,
                    self.scanner.root_exists(),
                    settings.debug_simulated_size,
                    &self.thresholds,
                ),
                0,
            )
        } else {
            let inventory = self.scanner.scan();
            (
                CacheStatus::from_inventory(&inventory, &self.thresholds),
                inventory.unreadable_entries,
            )
        };
        let status = status.with_volume_free(volume_stats(target).ok().map(|v| v.available_bytes));

        #[allow(clippy::cast_possible_truncation)]
        self.log(ActivityEvent::ScanCompleted {
            total_bytes: status.total_bytes,
            state: status.state.as_str().to_string(),
            item_count: status.item_count,
            unreadable_entries: unreadable,
            simulated: status.simulated,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        status
    }

    /// Clean, then publish the re-measured status. A dry run publishes nothing.
    pub fn clean_with_trigger(&self, dry_run: bool, trigger: CleanTrigger) -> Result<CleanResult> {
        let result = self.executor.clean_with_trigger(dry_run, trigger)?;
        if !dry_run {
            self.bus.publish(&BridgeEvent::StatusUpdate(self.measure()));
        }
        Ok(result)
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

impl CacheCommands for CacheService {
    fn get_status(&self) -> CacheStatus {
        self.measure()
    }

    fn clean(&self, dry_run: bool) -> Result<CleanResult> {
        self.clean_with_trigger(dry_run, CleanTrigger::Manual)
    }

    fn get_last_clean_time(&self) -> String {
        time_since(self.settings.load().last_clean_timestamp, unix_now())
    }

    fn get_settings(&self) -> Settings {
        self.settings.refresh().unwrap_or_else(|| self.settings.load())
    }

    fn update_settings(&self, settings: Settings) -> Result<()> {
        self.settings.replace(settings).map(|_| ())
    }

    fn subscribe(&self) -> Receiver<BridgeEvent> {
        self.bus.subscribe()
    }

    fn log_path(&self) -> PathBuf {
        self.executor.audit_log().path().to_path_buf()
    }
}
