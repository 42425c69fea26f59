//! In-process publish/subscribe for status, settings and clean results.
//!
//! Every subscriber owns a bounded crossbeam channel. Publishing never blocks:
//! a full subscriber misses the event (counted), a dropped receiver is pruned
//! on the next publish. There is no replay; late subscribers see only what is
//! published after they subscribe.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::settings::Settings;
use crate::monitor::classifier::CacheState;
use crate::monitor::status::CacheStatus;
use crate::scanner::deletion::CleanResult;

// ──────────────────── bridge events ────────────────────

/// Events delivered to presentation surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum BridgeEvent {
    /// Published at the end of every monitor tick and after every clean.
    #[serde(rename = "cache-status-update")]
    StatusUpdate(CacheStatus),
    /// Full post-update settings, once per successful update.
    SettingsUpdated(Settings),
    AutoCleanCompleted(CleanResult),
    AutoCleanFailed { code: String, message: String },
    /// The cache moved up into warning or critical.
    ThresholdReached { state: CacheState, total_bytes: u64 },
}

impl BridgeEvent {
    /// Wire name of the event.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StatusUpdate(_) => "cache-status-update",
            Self::SettingsUpdated(_) => "settings-updated",
            Self::AutoCleanCompleted(_) => "auto-clean-completed",
            Self::AutoCleanFailed { .. } => "auto-clean-failed",
            Self::ThresholdReached { .. } => "threshold-reached",
        }
    }
}

// ──────────────────── bus ────────────────────

struct BusInner<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
    capacity: usize,
    dropped: AtomicU64,
}

/// Cheaply cloneable fan-out bus. Clones share subscribers.
pub struct EventBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> EventBus<T> {
    /// Create a bus whose subscribers buffer up to `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = bounded(self.inner.capacity);
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber. Returns how many received it.
    pub fn publish(&self, event: &T) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    /// Subscribers still registered (pruning happens lazily on publish).
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Events skipped because a subscriber's buffer was full.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}
