//! Shore upload worker.
//!
//! Once per cycle: evaluate the geofence gate against the tracker's current
//! location; while open, upload every archive pending in `complete/`, confirm
//! the remote copy's size, and dispose of the local copy — delete it when
//! `delete_after_transfer` is set, otherwise move it to `transferred/`. A
//! size mismatch always leaves the local file in place for the next cycle.
//!
//! Any connection-level failure abandons the rest of the cycle (the worker
//! itself keeps running); the next cycle starts with a fresh session. This
//! worker is the only thing that disposes of archives — channels never touch
//! files after the archiver hand-off.

use crate::error::{AppResult, RelayError};
use crate::geofence::{self, Zone};
use crate::health::HealthTracker;
use crate::shutdown::ShutdownController;
use log::{info, warn};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::FtpStream;

/// One authenticated session against the shore server.
pub trait ShoreSession {
    /// Upload `local` under `name` in the session's working directory.
    fn upload(&mut self, name: &str, local: &Path) -> AppResult<()>;

    /// Size of `name` on the remote, or `None` when the listing does not
    /// contain it.
    fn remote_size(&mut self, name: &str) -> AppResult<Option<u64>>;
}

/// Opens a fresh [`ShoreSession`] per transfer cycle.
pub trait ShoreConnector: Send {
    fn open(&mut self) -> AppResult<Box<dyn ShoreSession>>;
}

// ---------------------------------------------------------------------------
// FTP implementation

pub struct FtpShore {
    server: String,
    user: String,
    password: String,
    /// Remote working directory; the vessel name by convention.
    remote_dir: String,
}

impl FtpShore {
    pub fn new(server: &str, user: &str, password: &str, remote_dir: &str) -> Self {
        let server = if server.contains(':') {
            server.to_string()
        } else {
            format!("{server}:21")
        };
        Self {
            server,
            user: user.to_string(),
            password: password.to_string(),
            remote_dir: remote_dir.to_string(),
        }
    }
}

fn ftp_err(err: suppaftp::FtpError) -> RelayError {
    RelayError::Transfer(err.to_string())
}

impl ShoreConnector for FtpShore {
    fn open(&mut self) -> AppResult<Box<dyn ShoreSession>> {
        let mut stream = FtpStream::connect(self.server.as_str()).map_err(ftp_err)?;
        stream.login(&self.user, &self.password).map_err(ftp_err)?;
        stream.transfer_type(FileType::Binary).map_err(ftp_err)?;
        stream
            .cwd(format!("/{}", self.remote_dir))
            .map_err(ftp_err)?;
        Ok(Box::new(FtpSession { stream }))
    }
}

struct FtpSession {
    stream: FtpStream,
}

impl ShoreSession for FtpSession {
    fn upload(&mut self, name: &str, local: &Path) -> AppResult<()> {
        let mut reader = File::open(local)?;
        self.stream.put_file(name, &mut reader).map_err(ftp_err)?;
        Ok(())
    }

    fn remote_size(&mut self, name: &str) -> AppResult<Option<u64>> {
        let listing = self.stream.nlst(None).map_err(ftp_err)?;
        if !listing.iter().any(|entry| entry == name) {
            return Ok(None);
        }
        let size = self.stream.size(name).map_err(ftp_err)?;
        Ok(Some(size as u64))
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        let _ = self.stream.quit();
    }
}

// ---------------------------------------------------------------------------
// Worker

pub struct TransferWorker<C: ShoreConnector> {
    connector: C,
    complete_dir: PathBuf,
    transferred_dir: PathBuf,
    delete_after_transfer: bool,
    interval: Duration,
    zones: Vec<Zone>,
    health: Arc<HealthTracker>,
    shutdown: Arc<ShutdownController>,
}

impl<C: ShoreConnector> TransferWorker<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: C,
        complete_dir: PathBuf,
        transferred_dir: PathBuf,
        delete_after_transfer: bool,
        interval: Duration,
        zones: Vec<Zone>,
        health: Arc<HealthTracker>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            connector,
            complete_dir,
            transferred_dir,
            delete_after_transfer,
            interval,
            zones,
            health,
            shutdown,
        }
    }

    pub fn run(mut self) {
        info!(
            "transfer worker started ({} zones, cycle {:?})",
            self.zones.len(),
            self.interval
        );
        loop {
            if self.shutdown.is_shutdown() {
                break;
            }
            if geofence::can_transmit(self.health.location(), &self.zones) {
                if let Err(err) = self.run_cycle() {
                    warn!("transfer cycle aborted: {err}");
                }
            }
            if !self.shutdown.sleep_cancellable(self.interval) {
                break;
            }
        }
        info!("transfer worker exiting");
    }

    /// One pass over the pending archives. A connection-level error aborts
    /// the remaining entries; per-entry disposal never removes a local file
    /// whose remote size does not match.
    pub fn run_cycle(&mut self) -> AppResult<()> {
        let pending = self.pending_archives()?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut session = self.connector.open()?;
        for path in pending {
            // Finish the unit in flight, never start another past shutdown.
            if self.shutdown.is_shutdown() {
                break;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };

            session.upload(&name, &path)?;
            let local_size = fs::metadata(&path)?.len();
            match session.remote_size(&name)? {
                Some(remote) if remote == local_size => {
                    info!("{name} transferred ({local_size} bytes)");
                    self.dispose(&path, &name)?;
                }
                Some(remote) => warn!(
                    "{name}: remote size {remote} != local {local_size}, keeping local copy"
                ),
                None => warn!("{name}: missing from remote listing, keeping local copy"),
            }
        }
        Ok(())
    }

    fn pending_archives(&self) -> AppResult<Vec<PathBuf>> {
        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.complete_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "zip") {
                archives.push(path);
            }
        }
        archives.sort();
        Ok(archives)
    }

    fn dispose(&self, path: &Path, name: &str) -> AppResult<()> {
        if self.delete_after_transfer {
            fs::remove_file(path)?;
            info!("local archive {name} deleted");
        } else {
            fs::create_dir_all(&self.transferred_dir)?;
            fs::rename(path, self.transferred_dir.join(name))?;
            info!("archive {name} moved to transferred/");
        }
        Ok(())
    }
}
