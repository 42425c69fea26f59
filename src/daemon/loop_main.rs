//! Monitor loop: periodic measure → classify → auto-clean → publish.
//!
//! One tick at a time. A tick requested while another is running is skipped,
//! never queued. Between ticks the loop sleeps in short slices so signals are
//! noticed promptly; the deadline is recomputed from the live
//! `monitor_interval_secs` setting after every slice.
//!
//! The process owning the loop is [`MonitoringDaemon`]: it also owns the
//! activity logger thread and the signal handler.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::format::unix_now;
use crate::core::settings::Settings;
use crate::daemon::bridge::CacheService;
use crate::daemon::events::BridgeEvent;
use crate::daemon::policy::AutoCleanPolicy;
use crate::daemon::signals::SignalHandler;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, DualLoggerConfig, spawn_logger};
use crate::monitor::classifier::CacheState;
use crate::monitor::status::{CacheStatus, StatusSnapshot};
use crate::scanner::deletion::CleanResult;

/// Upper bound on one sleep slice between signal checks.
const POLL_SLICE: Duration = Duration::from_millis(250);

// ──────────────────── tick types ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Scanning,
    Evaluating,
}

/// What an auto-clean started by a tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoCleanOutcome {
    Completed(CleanResult),
    Failed { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Final status of the tick, re-measured when an auto-clean ran.
    pub status: CacheStatus,
    /// State at the end of the previous tick.
    pub previous_state: Option<CacheState>,
    pub auto_clean: Option<AutoCleanOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick was still running.
    Skipped,
}

// ──────────────────── monitor loop ────────────────────

pub struct MonitorLoop {
    service: Arc<CacheService>,
    policy: Mutex<AutoCleanPolicy>,
    phase: Mutex<MonitorPhase>,
    ticking: AtomicBool,
    last_status: Mutex<Option<CacheStatus>>,
    status_file: Option<PathBuf>,
}

/// Returns the loop to `Idle` and clears the tick flag when a tick ends.
struct TickGuard<'a> {
    ticking: &'a AtomicBool,
    phase: &'a Mutex<MonitorPhase>,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock() = MonitorPhase::Idle;
        self.ticking.store(false, Ordering::Release);
    }
}

impl MonitorLoop {
    /// Loop writing `status.json` to the configured path.
    pub fn new(service: Arc<CacheService>) -> Self {
        let status_file = Some(service.config().paths.status_file.clone());
        Self::with_status_file(service, status_file)
    }

    pub fn with_status_file(service: Arc<CacheService>, status_file: Option<PathBuf>) -> Self {
        Self {
            service,
            policy: Mutex::new(AutoCleanPolicy::new()),
            phase: Mutex::new(MonitorPhase::Idle),
            ticking: AtomicBool::new(false),
            last_status: Mutex::new(None),
            status_file,
        }
    }

    pub fn service(&self) -> &Arc<CacheService> {
        &self.service
    }

    pub fn phase(&self) -> MonitorPhase {
        *self.phase.lock()
    }

    /// Status published by the most recent completed tick.
    pub fn last_status(&self) -> Option<CacheStatus> {
        self.last_status.lock().clone()
    }

    pub fn tick(&self) -> TickOutcome {
        self.tick_at(unix_now())
    }

    /// One monitor cycle with an explicit wall-clock time for the schedule check.
    pub fn tick_at(&self, now: u64) -> TickOutcome {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TickOutcome::Skipped;
        }
        let _guard = TickGuard {
            ticking: &self.ticking,
            phase: &self.phase,
        };

        // Pick up edits made by other processes, e.g. `symsweep settings set`.
        if let Some(fresh) = self.service.settings_store().refresh() {
            self.log_settings(&fresh, "changed on disk");
        }

        *self.phase.lock() = MonitorPhase::Scanning;
        let measured = self.service.measure();

        *self.phase.lock() = MonitorPhase::Evaluating;
        let settings = self.service.settings_store().load();
        let previous_state = self.last_status.lock().as_ref().map(|s| s.state);
        self.note_state(previous_state.unwrap_or_default(), &measured, &settings);

        let trigger = self.policy.lock().evaluate(&measured, &settings, now);
        let mut status = measured;
        let mut auto_clean = None;
        if let Some(trigger) = trigger {
            eprintln!(
                "[SSW-DAEMON] auto-clean triggered ({trigger}) at {}",
                status.formatted_size()
            );
            self.log(ActivityEvent::AutoCleanTriggered {
                trigger: trigger.to_string(),
                total_bytes: status.total_bytes,
            });

            match self
                .service
                .executor()
                .clean_with_trigger(false, trigger.as_clean_trigger())
            {
                Ok(result) => {
                    eprintln!("[SSW-DAEMON] auto-clean finished: {}", result.message);
                    self.service
                        .bus()
                        .publish(&BridgeEvent::AutoCleanCompleted(result.clone()));
                    auto_clean = Some(AutoCleanOutcome::Completed(result));

                    let after = self.service.measure();
                    self.policy.lock().observe(&after);
                    self.note_state(status.state, &after, &settings);
                    status = after;
                }
                Err(e) => {
                    eprintln!("[SSW-DAEMON] auto-clean failed: {e}");
                    let (code, message) = (e.code().to_string(), e.to_string());
                    self.log(ActivityEvent::Error {
                        code: code.clone(),
                        message: format!("auto-clean failed: {message}"),
                    });
                    self.service.bus().publish(&BridgeEvent::AutoCleanFailed {
                        code: code.clone(),
                        message: message.clone(),
                    });
                    auto_clean = Some(AutoCleanOutcome::Failed { code, message });
                }
            }
        }

        self.service
            .bus()
            .publish(&BridgeEvent::StatusUpdate(status.clone()));
        if let Some(path) = &self.status_file {
            if let Err(e) = StatusSnapshot::new(status.clone()).write(path) {
                eprintln!("[SSW-DAEMON] status file write failed: {e}");
            }
        }
        *self.last_status.lock() = Some(status.clone());

        TickOutcome::Completed(TickReport {
            status,
            previous_state,
            auto_clean,
        })
    }

    /// Tick immediately, then on every interval until shutdown is signalled.
    pub fn run(&self, signals: &SignalHandler) {
        let mut last_start = Instant::now();
        self.tick();

        loop {
            if signals.should_shutdown() {
                eprintln!("[SSW-DAEMON] shutdown requested");
                break;
            }
            if signals.should_reload() {
                self.reload_settings();
            }

            let interval = live_interval(&self.service.settings_store().load());
            let now = Instant::now();
            let due = next_deadline(last_start, interval, now);

            if signals.should_tick() || now >= due {
                last_start = Instant::now();
                if self.tick() == TickOutcome::Skipped {
                    eprintln!("[SSW-DAEMON] tick skipped: previous tick still running");
                }
                continue;
            }
            thread::sleep(POLL_SLICE.min(due.saturating_duration_since(now)));
        }
    }

    fn reload_settings(&self) {
        let settings = self.service.settings_store().reload();
        self.log_settings(&settings, "reloaded");
    }

    fn log_settings(&self, settings: &Settings, how: &str) {
        eprintln!(
            "[SSW-DAEMON] settings {how} (interval={}s)",
            settings.monitor_interval_secs
        );
        self.log(ActivityEvent::SettingsReloaded {
            details: format!(
                "monitor_interval_secs={} auto_clean_on_threshold={} auto_clean_scheduled={}",
                settings.monitor_interval_secs,
                settings.auto_clean_on_threshold,
                settings.auto_clean_scheduled
            ),
        });
    }

    fn note_state(&self, previous: CacheState, status: &CacheStatus, settings: &Settings) {
        if previous == status.state {
            return;
        }
        eprintln!(
            "[SSW-DAEMON] cache state {previous} -> {} ({})",
            status.state,
            status.formatted_size()
        );
        self.log(ActivityEvent::StateChanged {
            from: previous.to_string(),
            to: status.state.to_string(),
            total_bytes: status.total_bytes,
        });
        if status.state > previous && settings.show_notifications {
            self.service.bus().publish(&BridgeEvent::ThresholdReached {
                state: status.state,
                total_bytes: status.total_bytes,
            });
        }
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = self.service.logger() {
            logger.send(event);
        }
    }
}

fn live_interval(settings: &Settings) -> Duration {
    Duration::from_secs(u64::from(settings.monitor_interval_secs.max(1)))
}

/// First point on the `last_start + k * interval` grid strictly after `now`.
/// Fires that came due while a tick was still running are skipped.
fn next_deadline(last_start: Instant, interval: Duration, now: Instant) -> Instant {
    let periods = now.saturating_duration_since(last_start).as_nanos() / interval.as_nanos().max(1);
    let next = u32::try_from(periods.saturating_add(1)).unwrap_or(u32::MAX);
    last_start + interval.saturating_mul(next)
}

// ──────────────────── daemon process ────────────────────

/// Owns the logger thread, the service and the loop for `symsweep daemon`.
pub struct MonitoringDaemon {
    config: Config,
    monitor: MonitorLoop,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    start_time: Instant,
}

impl MonitoringDaemon {
    pub fn init(config: Config) -> Result<Self> {
        let (logger_handle, logger_join) =
            spawn_logger(DualLoggerConfig::from_config(&config))?;
        let service = Arc::new(CacheService::new(config.clone(), Some(logger_handle.clone())));
        Ok(Self {
            monitor: MonitorLoop::new(service),
            config,
            logger_handle,
            logger_join: Some(logger_join),
            start_time: Instant::now(),
        })
    }

    pub fn monitor(&self) -> &MonitorLoop {
        &self.monitor
    }

    /// Run until SIGTERM/SIGINT or `signals.request_shutdown()`.
    pub fn run(&mut self, signals: &SignalHandler) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.logger_handle.try_send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config_hash.clone(),
            target: self.config.target.path.display().to_string(),
        })?;
        eprintln!(
            "[SSW-DAEMON] monitoring {} (config {config_hash})",
            self.config.target.path.display()
        );

        self.monitor.run(signals);
        self.shutdown();
        Ok(())
    }

    fn shutdown(&mut self) {
        let uptime_secs = self.start_time.elapsed().as_secs();
        self.logger_handle.send(ActivityEvent::DaemonStopped {
            reason: "signal".to_string(),
            uptime_secs,
        });
        self.logger_handle.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
        eprintln!("[SSW-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::deletion::CleanTrigger;
    use std::fs;
    use tempfile::TempDir;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.target.path = dir.path().join("com.apple.coresymbolicationd");
        config.paths.settings_file = dir.path().join("settings.json");
        config.paths.audit_log = dir.path().join("deletions.log");
        config.paths.status_file = dir.path().join("status.json");
        config.paths.sqlite_db = dir.path().join("activity.sqlite3");
        config.paths.jsonl_log = dir.path().join("activity.jsonl");
        fs::create_dir_all(&config.target.path).unwrap();
        config
    }

    fn monitor(dir: &TempDir) -> MonitorLoop {
        MonitorLoop::new(Arc::new(CacheService::new(config(dir), None)))
    }

    fn set_debug_size(m: &MonitorLoop, bytes: u64) {
        m.service()
            .settings_store()
            .update(|s| {
                s.debug_mode = true;
                s.debug_simulated_size = bytes;
            })
            .unwrap();
    }

    fn report(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Completed(r) => r,
            TickOutcome::Skipped => panic!("tick skipped"),
        }
    }

    #[test]
    fn tick_publishes_status_and_writes_file() {
        let dir = TempDir::new().unwrap();
        let m = monitor(&dir);
        let rx = m.service().bus().subscribe();

        let r = report(m.tick());
        assert_eq!(r.status.state, CacheState::Normal);
        assert_eq!(r.previous_state, None);
        assert_eq!(m.phase(), MonitorPhase::Idle);
        assert!(matches!(rx.try_recv().unwrap(), BridgeEvent::StatusUpdate(_)));

        let snap = StatusSnapshot::read(&dir.path().join("status.json"))
            .unwrap()
            .unwrap();
        assert_eq!(snap.status, r.status);
    }

    #[test]
    fn overlapping_tick_is_skipped() {
        let dir = TempDir::new().unwrap();
        let m = monitor(&dir);
        m.ticking.store(true, Ordering::Release);
        assert_eq!(m.tick(), TickOutcome::Skipped);
        m.ticking.store(false, Ordering::Release);
        assert!(matches!(m.tick(), TickOutcome::Completed(_)));
    }

    #[test]
    fn threshold_events_follow_state_rises() {
        let dir = TempDir::new().unwrap();
        let m = monitor(&dir);
        let rx = m.service().bus().subscribe();

        for bytes in [2 * GIB, 6 * GIB, 11 * GIB, GIB] {
            set_debug_size(&m, bytes);
            m.tick();
        }
        let reached: Vec<CacheState> = rx
            .try_iter()
            .filter_map(|e| match e {
                BridgeEvent::ThresholdReached { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(reached, vec![CacheState::Warning, CacheState::Critical]);
    }

    #[test]
    fn notifications_off_suppresses_threshold_events() {
        let dir = TempDir::new().unwrap();
        let m = monitor(&dir);
        m.service()
            .settings_store()
            .update(|s| s.show_notifications = false)
            .unwrap();
        let rx = m.service().bus().subscribe();
        set_debug_size(&m, 11 * GIB);
        m.tick();
        assert!(
            !rx.try_iter()
                .any(|e| matches!(e, BridgeEvent::ThresholdReached { .. }))
        );
    }

    #[test]
    fn auto_clean_on_threshold_cleans_real_directory() {
        let dir = TempDir::new().unwrap();
        let m = monitor(&dir);
        let target = m.service().config().target.path.clone();
        let f = fs::File::create(target.join("blob")).unwrap();
        f.set_len(6 * GIB).unwrap();
        m.service()
            .settings_store()
            .update(|s| s.auto_clean_on_threshold = true)
            .unwrap();
        let rx = m.service().bus().subscribe();

        let r = report(m.tick());
        match r.auto_clean {
            Some(AutoCleanOutcome::Completed(result)) => {
                assert_eq!(result.bytes_freed, 6 * GIB);
                assert_eq!(result.trigger, CleanTrigger::Threshold);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(r.status.total_bytes, 0);
        assert!(
            rx.try_iter()
                .any(|e| matches!(e, BridgeEvent::AutoCleanCompleted(_)))
        );
        assert!(m.service().settings_store().load().last_clean_timestamp > 0);
    }

    #[test]
    fn scheduled_clean_runs_when_interval_elapsed() {
        let dir = TempDir::new().unwrap();
        let m = monitor(&dir);
        fs::write(m.service().config().target.path.join("old.cache"), vec![0u8; 2048]).unwrap();
        m.service()
            .settings_store()
            .update(|s| {
                s.auto_clean_scheduled = true;
                s.auto_clean_interval_secs = 3600;
            })
            .unwrap();

        let r = report(m.tick_at(10_000));
        match r.auto_clean {
            Some(AutoCleanOutcome::Completed(result)) => {
                assert_eq!(result.trigger, CleanTrigger::Schedule);
                assert_eq!(result.bytes_freed, 2048);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // last_clean_timestamp is now the real clock; an hour has not passed.
        let r = report(m.tick());
        assert!(r.auto_clean.is_none());
    }

    #[test]
    fn deadlines_skip_missed_periods() {
        let start = Instant::now();
        let interval = Duration::from_secs(10);
        assert_eq!(next_deadline(start, interval, start), start + interval);
        // A fire at +10s came due mid-tick: skipped, the next one is +20s.
        assert_eq!(
            next_deadline(start, interval, start + Duration::from_secs(15)),
            start + Duration::from_secs(20)
        );
        assert_eq!(
            next_deadline(start, interval, start + Duration::from_secs(35)),
            start + Duration::from_secs(40)
        );
        // Exactly on a grid point: that point is already past.
        assert_eq!(
            next_deadline(start, interval, start + interval),
            start + Duration::from_secs(20)
        );
    }

    #[test]
    fn tick_adopts_settings_written_by_another_process() {
        let dir = TempDir::new().unwrap();
        let m = monitor(&dir);
        let rx = m.service().bus().subscribe();

        let cli = crate::core::settings::SettingsStore::open(&dir.path().join("settings.json"));
        cli.update(|s| {
            s.debug_mode = true;
            s.debug_simulated_size = 6 * GIB;
        })
        .unwrap();

        let r = report(m.tick());
        assert!(r.status.simulated);
        assert_eq!(r.status.total_bytes, 6 * GIB);
        assert!(m.service().settings_store().load().debug_mode);
        assert!(
            rx.try_iter()
                .any(|e| matches!(e, BridgeEvent::SettingsUpdated(s) if s.debug_mode))
        );
    }

    #[test]
    fn run_ticks_immediately_and_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let m = Arc::new(monitor(&dir));
        let signals = SignalHandler::unregistered();

        let worker = {
            let m = Arc::clone(&m);
            let signals = signals.clone();
            thread::spawn(move || m.run(&signals))
        };
        let status_path = dir.path().join("status.json");
        let deadline = Instant::now() + Duration::from_secs(10);
        while !status_path.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        signals.request_shutdown();
        worker.join().unwrap();
        assert!(status_path.exists());
        assert!(m.last_status().is_some());
    }

    #[test]
    fn daemon_logs_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let mut daemon = MonitoringDaemon::init(config(&dir)).unwrap();
        let signals = SignalHandler::unregistered();
        signals.request_shutdown();
        daemon.run(&signals).unwrap();

        let jsonl = fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        assert!(jsonl.contains("daemon_start"));
        assert!(jsonl.contains("cache_scan"));
        assert!(jsonl.contains("daemon_stop"));
    }
}
