//! Pipeline assembly: builds workers from settings and runs them to exit.
//!
//! One ingestion worker per configured channel, one monitor worker, one
//! transfer worker (when enabled), all observing the shared shutdown
//! controller. The stray-file sweep runs here, strictly before any channel
//! opens its first segment.

use crate::archive::{Archiver, COMPLETE_DIR, TRANSFERRED_DIR};
use crate::channel::ChannelWorker;
use crate::config::{DataSource, Settings};
use crate::error::{AppResult, RelayError};
use crate::filter::SentenceFilter;
use crate::geofence::{self, Zone};
use crate::health::HealthTracker;
use crate::segment::SegmentWriter;
use crate::shutdown::ShutdownController;
use crate::source::{SentenceSource, SerialSource, TcpSource};
use crate::status::{MonitorWorker, StatusSignal, StatusSink};
use crate::transfer::{FtpShore, TransferWorker};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct RelayApp {
    settings: Settings,
    storage_root: PathBuf,
    shutdown: Arc<ShutdownController>,
    health: Arc<HealthTracker>,
    archiver: Arc<Archiver>,
    sink: Arc<dyn StatusSink>,
    handles: Vec<JoinHandle<()>>,
}

impl RelayApp {
    pub fn new(
        settings: Settings,
        storage_root: PathBuf,
        sink: Arc<dyn StatusSink>,
    ) -> AppResult<Self> {
        let archiver = Arc::new(Archiver::new(&storage_root)?);
        Ok(Self {
            settings,
            storage_root,
            shutdown: ShutdownController::new(),
            health: Arc::new(HealthTracker::new()),
            archiver,
            sink,
            handles: Vec::new(),
        })
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Sweep strays, then spawn every worker.
    pub fn start(&mut self) -> AppResult<()> {
        // Leftovers from an unclean shutdown; must happen before any channel
        // opens a segment, since an open segment must never be swept.
        self.archiver
            .sweep_strays(&self.storage_root, &self.settings.storage.output_extension)?;

        self.start_channels()?;
        self.start_monitor()?;
        if self.settings.transfer.enabled {
            self.start_transfer()?;
        } else {
            info!("transfer disabled for this run");
        }
        Ok(())
    }

    /// Block until every worker has exited, then reap the threads.
    pub fn wait(&mut self) {
        self.shutdown.wait_all_exited();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.sink.signal(StatusSignal::ShutdownSequence);
    }

    fn start_channels(&mut self) -> AppResult<()> {
        let ingest = self.settings.ingest.clone();
        let filter = SentenceFilter::new(ingest.save_all, ingest.sentence_types.clone());

        match ingest.data_source {
            DataSource::Serial => {
                let mut started = 0usize;
                for cfg in &ingest.serial_ports {
                    // A vanished USB adapter must not take the whole pipeline
                    // down with it; the remaining channels still log.
                    let source = match SerialSource::open(cfg) {
                        Ok(source) => source,
                        Err(err) => {
                            warn!("{}: cannot open {}: {err}", cfg.name, cfg.port);
                            continue;
                        }
                    };
                    self.spawn_channel(Box::new(source), &cfg.name, filter.clone())?;
                    started += 1;
                }
                if started == 0 {
                    return Err(RelayError::Configuration(
                        "no serial channel could be opened".to_string(),
                    ));
                }
            }
            DataSource::Tcp => {
                let cfg = ingest.tcp.as_ref().ok_or_else(|| {
                    RelayError::Configuration("tcp source selected but not configured".to_string())
                })?;
                let source = TcpSource::open(cfg, Arc::clone(&self.shutdown));
                self.spawn_channel(Box::new(source), &cfg.name, filter)?;
            }
        }
        Ok(())
    }

    fn spawn_channel(
        &mut self,
        source: Box<dyn SentenceSource>,
        name: &str,
        filter: SentenceFilter,
    ) -> AppResult<()> {
        let writer = SegmentWriter::create(
            &self.storage_root,
            name,
            &self.settings.storage.output_extension,
            self.settings.storage.rotate_bytes,
        )?;
        let worker = ChannelWorker::new(
            source,
            filter,
            writer,
            Arc::clone(&self.archiver),
            Arc::clone(&self.health),
            Arc::clone(&self.shutdown),
        );
        self.spawn(&format!("channel-{name}"), move || worker.run())
    }

    fn start_monitor(&mut self) -> AppResult<()> {
        let worker = MonitorWorker::new(
            self.storage_root.clone(),
            Arc::clone(&self.health),
            Arc::clone(&self.sink),
            Arc::clone(&self.shutdown),
        );
        self.spawn("monitor", move || worker.run())
    }

    fn start_transfer(&mut self) -> AppResult<()> {
        let transfer = &self.settings.transfer;
        let zones = self.load_zones()?;
        let connector = FtpShore::new(
            &transfer.server,
            &transfer.user,
            &transfer.password,
            &self.settings.application.vessel,
        );
        let worker = TransferWorker::new(
            connector,
            self.storage_root.join(COMPLETE_DIR),
            self.storage_root.join(TRANSFERRED_DIR),
            transfer.delete_after_transfer,
            transfer.interval,
            zones,
            Arc::clone(&self.health),
            Arc::clone(&self.shutdown),
        );
        self.spawn("transfer", move || worker.run())
    }

    fn load_zones(&self) -> AppResult<Vec<Zone>> {
        if !self.settings.transfer.use_zone_file {
            // No zone file means transfer is unconditionally allowed.
            return Ok(Vec::new());
        }
        let path = self.settings.transfer.zone_file.as_ref().ok_or_else(|| {
            RelayError::Configuration("use_zone_file is set but no zone_file configured".to_string())
        })?;
        let zones = geofence::load_zones(path)?;
        info!("loaded {} transfer zone(s) from {}", zones.len(), path.display());
        Ok(zones)
    }

    fn spawn<F>(&mut self, name: &str, f: F) -> AppResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // Register before the thread exists so the coordinator can never
        // observe a zero count while workers are still starting.
        let guard = self.shutdown.register();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _guard = guard;
            f();
        })?;
        self.handles.push(handle);
        Ok(())
    }
}
