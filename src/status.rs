//! Discrete status signaling and the monitor worker.
//!
//! An unattended process has no interactive user; its externally visible
//! health is a handful of discrete signal codes (driven as LED patterns on
//! the deployed hardware) plus the log stream. The [`StatusSink`] trait is
//! the seam to that hardware; the default implementation routes codes to the
//! log.

use crate::health::HealthTracker;
use crate::shutdown::ShutdownController;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{DiskExt, System, SystemExt};

/// Free-space fraction below which the disk counts as near full.
const DISK_NEAR_FULL_RATIO: f64 = 0.10;
/// Monitor poll cadence.
const MONITOR_POLL: Duration = Duration::from_secs(2);

/// Discrete signal codes consumed by the platform status sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSignal {
    /// Position and radar both seen within the freshness window
    BothFresh,
    /// At least one of position/radar is stale
    Stale,
    DiskNearFull,
    Fatal,
    ShutdownSequence,
}

pub trait StatusSink: Send + Sync {
    fn signal(&self, signal: StatusSignal);
}

/// Default sink: status codes go to the log stream.
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn signal(&self, signal: StatusSignal) {
        match signal {
            StatusSignal::BothFresh => debug!("status: position and radar fresh"),
            StatusSignal::Stale => debug!("status: position or radar stale"),
            StatusSignal::DiskNearFull => warn!("status: storage over 90% full"),
            StatusSignal::Fatal => error!("status: fatal error"),
            StatusSignal::ShutdownSequence => info!("status: shutdown sequence"),
        }
    }
}

/// Periodically derives the fresh/stale signal from the health tracker and
/// watches free space on the storage root.
pub struct MonitorWorker {
    storage_root: PathBuf,
    health: Arc<HealthTracker>,
    sink: Arc<dyn StatusSink>,
    shutdown: Arc<ShutdownController>,
}

impl MonitorWorker {
    pub fn new(
        storage_root: PathBuf,
        health: Arc<HealthTracker>,
        sink: Arc<dyn StatusSink>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            storage_root,
            health,
            sink,
            shutdown,
        }
    }

    pub fn run(self) {
        info!("monitor worker started");
        let mut system = System::new();
        while !self.shutdown.is_shutdown() {
            if self.health.both_fresh(Utc::now()) {
                self.sink.signal(StatusSignal::BothFresh);
            } else {
                self.sink.signal(StatusSignal::Stale);
            }

            system.refresh_disks_list();
            if let Some(ratio) = free_ratio(&system, &self.storage_root) {
                if ratio < DISK_NEAR_FULL_RATIO {
                    self.sink.signal(StatusSignal::DiskNearFull);
                }
            }

            if !self.shutdown.sleep_cancellable(MONITOR_POLL) {
                break;
            }
        }
        info!("monitor worker exiting");
    }
}

/// Free-space fraction of the disk holding `path`: the disk with the longest
/// mount point that prefixes `path` wins.
fn free_ratio(system: &System, path: &Path) -> Option<f64> {
    let disk = system
        .disks()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;
    let total = disk.total_space();
    if total == 0 {
        return None;
    }
    Some(disk.available_space() as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        signals: Mutex<Vec<StatusSignal>>,
    }

    impl StatusSink for RecordingSink {
        fn signal(&self, signal: StatusSignal) {
            self.signals.lock().unwrap().push(signal);
        }
    }

    #[test]
    fn stale_signal_without_any_observations() {
        let sink = RecordingSink {
            signals: Mutex::new(Vec::new()),
        };
        let health = HealthTracker::new();
        if health.both_fresh(Utc::now()) {
            sink.signal(StatusSignal::BothFresh);
        } else {
            sink.signal(StatusSignal::Stale);
        }
        assert_eq!(sink.signals.lock().unwrap().as_slice(), &[StatusSignal::Stale]);
    }
}
