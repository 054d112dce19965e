//! CLI entry point for nmea_relay.
//!
//! Startup sequencing matters for an unattended logger: configuration and
//! clock validity are checked before anything touches the disk, the storage
//! root is located and verified writable, strays from an unclean shutdown
//! are archived, and only then do the workers start. SIGINT raises the
//! cancellation flag; the process exits once every worker has finished its
//! in-flight unit of work.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use nmea_relay::app::RelayApp;
use nmea_relay::config::Settings;
use nmea_relay::error::RelayError;
use nmea_relay::platform::{ClockCheck, ConfiguredStorage, StorageLocator, SystemClockCheck};
use nmea_relay::status::{LogStatusSink, StatusSignal, StatusSink};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nmea_relay")]
#[command(about = "Unattended NMEA logging and shore-relay pipeline", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config/nmea_relay.toml")]
    config: PathBuf,

    /// Disable the shore transfer worker for this run
    #[arg(long)]
    no_transfer: bool,

    /// Delete local archives after a verified transfer instead of keeping
    /// them under transferred/
    #[arg(long)]
    delete_after_transfer: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config).map_err(RelayError::Config)?;
    if cli.no_transfer {
        settings.transfer.enabled = false;
    }
    if cli.delete_after_transfer {
        settings.transfer.delete_after_transfer = true;
    }
    settings.validate().map_err(RelayError::Configuration)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.application.log_level.as_str()),
    )
    .format_timestamp_millis()
    .init();
    info!("*** program start (vessel {})", settings.application.vessel);

    let sink: Arc<dyn StatusSink> = Arc::new(LogStatusSink);

    if let Err(err) = SystemClockCheck.check() {
        sink.signal(StatusSignal::Fatal);
        error!("{err}");
        return Err(err.into());
    }

    let storage_root = match ConfiguredStorage::new(settings.storage.root.clone()).locate() {
        Ok(root) => root,
        Err(err) => {
            sink.signal(StatusSignal::Fatal);
            error!("{err}");
            return Err(err.into());
        }
    };
    info!("writing files to {}", storage_root.display());

    let mut app = RelayApp::new(settings, storage_root, Arc::clone(&sink))?;

    let shutdown = app.shutdown_controller();
    ctrlc::set_handler(move || {
        info!("termination requested");
        shutdown.request_shutdown();
    })?;

    if let Err(err) = app.start() {
        sink.signal(StatusSignal::Fatal);
        error!("{err}");
        return Err(err.into());
    }

    app.wait();
    info!("*** program end");
    Ok(())
}
