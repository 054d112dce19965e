//! Per-channel ingestion worker: source → filter → health → segment.
//!
//! One of these runs per configured channel, on its own thread. The loop is
//! the pipeline's hot path: pull a line, decide retention, stamp it, feed the
//! health tracker, append to the open segment, and hand a closed segment to
//! the archiver when a write crosses the rotation threshold.

use crate::archive::Archiver;
use crate::filter::SentenceFilter;
use crate::health::HealthTracker;
use crate::segment::SegmentWriter;
use crate::shutdown::ShutdownController;
use crate::source::SentenceSource;
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;

pub struct ChannelWorker {
    source: Box<dyn SentenceSource>,
    filter: SentenceFilter,
    writer: SegmentWriter,
    archiver: Arc<Archiver>,
    health: Arc<HealthTracker>,
    shutdown: Arc<ShutdownController>,
}

impl ChannelWorker {
    pub fn new(
        source: Box<dyn SentenceSource>,
        filter: SentenceFilter,
        writer: SegmentWriter,
        archiver: Arc<Archiver>,
        health: Arc<HealthTracker>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            source,
            filter,
            writer,
            archiver,
            health,
            shutdown,
        }
    }

    pub fn run(mut self) {
        let name = self.source.name().to_string();
        info!("{name}: ingestion worker started");

        while !self.shutdown.is_shutdown() {
            let line = match self.source.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(err) => {
                    warn!("{name}: read failed: {err}");
                    continue;
                }
            };

            let captured = Utc::now();
            let Some(stamped) = self.filter.apply(&line, captured) else {
                continue;
            };
            self.health.observe(&line, captured);

            match self.writer.append(&stamped) {
                Ok(Some(closed)) => {
                    if let Err(err) = self.archiver.archive(&closed) {
                        warn!("{name}: archival of {} failed: {err}", closed.path.display());
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("{name}: write failed: {err}"),
            }
        }

        // The open segment stays on disk; the next startup's stray sweep
        // archives it.
        info!(
            "{name}: exiting after {} transient read errors, open segment {}",
            self.source.error_count(),
            self.writer.path().display()
        );
    }
}
