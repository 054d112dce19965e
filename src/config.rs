//! Configuration loading and validation.
//!
//! Settings are loaded from a TOML file and may be overridden by environment
//! variables prefixed with `NMEA_RELAY_` (nested keys separated by `__`, e.g.
//! `NMEA_RELAY_TRANSFER__ENABLED=false`).
//!
//! Validation happens after loading and is fatal: an unattended process must
//! not start a partial pipeline on a half-usable configuration.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application-level settings
    pub application: ApplicationConfig,
    /// Storage root and rotation settings
    pub storage: StorageConfig,
    /// Sentence sources and retention filter
    pub ingest: IngestConfig,
    /// Shore transfer settings
    pub transfer: TransferConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Vessel name; also the remote directory archives are uploaded into
    pub vessel: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Storage root and segment rotation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory active segments are written to; `complete/` and
    /// `transferred/` live underneath it
    pub root: PathBuf,
    /// File extension for active and archived segments
    #[serde(default = "default_extension")]
    pub output_extension: String,
    /// Rotation threshold: a segment is closed once its byte count strictly
    /// exceeds this
    #[serde(default = "default_rotate_bytes")]
    pub rotate_bytes: u64,
}

/// Which transport the pipeline ingests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Serial,
    Tcp,
}

/// Sentence sources and the retention filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Transport kind for this deployment
    pub data_source: DataSource,
    /// Retain every non-empty line regardless of type
    #[serde(default)]
    pub save_all: bool,
    /// Sentence-type tokens to retain (substring match, e.g. "GGA")
    #[serde(default)]
    pub sentence_types: Vec<String>,
    /// Serial channels, one worker each
    #[serde(default)]
    pub serial_ports: Vec<SerialPortConfig>,
    /// TCP channel (at most one)
    pub tcp: Option<TcpConfig>,
}

/// One serial ingestion channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortConfig {
    /// Channel name, used in segment file names
    pub name: String,
    /// Serial device path (e.g. "/dev/ttyUSB0")
    pub port: String,
    /// Communication speed (e.g. 4800, 38400)
    pub baud_rate: u32,
    /// Data bits (5-8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity: "none", "odd" or "even"
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Read timeout; bounds how long a worker blocks between shutdown checks
    #[serde(with = "humantime_serde", default = "default_serial_timeout")]
    pub timeout: Duration,
}

/// The TCP ingestion channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Channel name, used in segment file names
    #[serde(default = "default_tcp_name")]
    pub name: String,
    /// Upstream multiplexer host
    pub host: String,
    /// Upstream multiplexer port
    pub port: u16,
}

/// Shore transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Run the transfer worker at all
    #[serde(default)]
    pub enabled: bool,
    /// Delete local archives after a verified upload instead of moving them
    /// to `transferred/`
    #[serde(default)]
    pub delete_after_transfer: bool,
    /// Shore FTP server, "host" or "host:port"
    #[serde(default)]
    pub server: String,
    /// FTP credentials
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Wait between transfer cycles
    #[serde(with = "humantime_serde", default = "default_transfer_interval")]
    pub interval: Duration,
    /// Gate transfers on the geofence zone file; without it transfer is
    /// unconditionally allowed
    #[serde(default)]
    pub use_zone_file: bool,
    /// Path to the zone file; required when `use_zone_file` is set
    pub zone_file: Option<PathBuf>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_extension() -> String {
    "dat".to_string()
}

fn default_rotate_bytes() -> u64 {
    1_000_000
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_serial_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_tcp_name() -> String {
    "tcp".to_string()
}

fn default_transfer_interval() -> Duration {
    Duration::from_secs(300)
}

impl Settings {
    /// Load configuration from a TOML file plus `NMEA_RELAY_` environment
    /// overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("NMEA_RELAY_").split("__"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.application.vessel.trim().is_empty() {
            return Err("vessel must not be empty".to_string());
        }

        if self.storage.rotate_bytes == 0 {
            return Err("rotate_bytes must be greater than 0".to_string());
        }

        if self.storage.output_extension.is_empty() {
            return Err("output_extension must not be empty".to_string());
        }
        // Archives use .zip; an identical active extension would make the
        // stray sweep re-archive compressed archives.
        if self.storage.output_extension == "zip" {
            return Err("output_extension must not be 'zip'".to_string());
        }

        match self.ingest.data_source {
            DataSource::Serial => {
                if self.ingest.serial_ports.is_empty() {
                    return Err(
                        "data_source is 'serial' but no [[ingest.serial_ports]] configured"
                            .to_string(),
                    );
                }
                let mut names = std::collections::HashSet::new();
                for sp in &self.ingest.serial_ports {
                    if sp.name.is_empty() || sp.port.is_empty() {
                        return Err("serial channel name and port must not be empty".to_string());
                    }
                    if !names.insert(&sp.name) {
                        return Err(format!("Duplicate channel name: {}", sp.name));
                    }
                    if sp.baud_rate == 0 {
                        return Err(format!("Channel '{}': baud_rate must be > 0", sp.name));
                    }
                    if !(5..=8).contains(&sp.data_bits) {
                        return Err(format!("Channel '{}': data_bits must be 5-8", sp.name));
                    }
                    if !["none", "odd", "even"].contains(&sp.parity.as_str()) {
                        return Err(format!(
                            "Channel '{}': parity must be none, odd or even",
                            sp.name
                        ));
                    }
                    if !(1..=2).contains(&sp.stop_bits) {
                        return Err(format!("Channel '{}': stop_bits must be 1 or 2", sp.name));
                    }
                }
            }
            DataSource::Tcp => {
                let tcp = self
                    .ingest
                    .tcp
                    .as_ref()
                    .ok_or("data_source is 'tcp' but no [ingest.tcp] configured")?;
                if tcp.host.is_empty() {
                    return Err("tcp host must not be empty".to_string());
                }
                if tcp.port == 0 {
                    return Err("tcp port must be greater than 0".to_string());
                }
            }
        }

        if !self.ingest.save_all && self.ingest.sentence_types.is_empty() {
            return Err(
                "either save_all must be set or at least one sentence type configured".to_string(),
            );
        }

        if self.transfer.enabled {
            if self.transfer.server.is_empty() || self.transfer.user.is_empty() {
                return Err("transfer enabled but server/user not configured".to_string());
            }
            if self.transfer.interval.is_zero() {
                return Err("transfer interval must be greater than 0".to_string());
            }
            if self.transfer.use_zone_file && self.transfer.zone_file.is_none() {
                return Err("use_zone_file is set but no zone_file configured".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [application]
        vessel = "southern-surveyor"

        [storage]
        root = "/media/vessel/datalog"
        rotate_bytes = 500000

        [ingest]
        data_source = "tcp"
        sentence_types = ["GGA", "TTM"]

        [ingest.tcp]
        host = "192.168.1.50"
        port = 10110

        [transfer]
        enabled = true
        server = "shore.example.org"
        user = "vessel"
        password = "secret"
        interval = "5m"
    "#;

    fn load(toml: &str) -> Settings {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .expect("sample config must parse")
    }

    #[test]
    fn sample_config_parses_and_validates() {
        let settings = load(SAMPLE);
        assert_eq!(settings.application.vessel, "southern-surveyor");
        assert_eq!(settings.application.log_level, "info");
        assert_eq!(settings.storage.output_extension, "dat");
        assert_eq!(settings.storage.rotate_bytes, 500_000);
        assert_eq!(settings.ingest.data_source, DataSource::Tcp);
        assert_eq!(settings.transfer.interval, Duration::from_secs(300));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn serial_source_requires_channels() {
        let mut settings = load(SAMPLE);
        settings.ingest.data_source = DataSource::Serial;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn duplicate_channel_names_rejected() {
        let mut settings = load(SAMPLE);
        settings.ingest.data_source = DataSource::Serial;
        let port = SerialPortConfig {
            name: "gps0".to_string(),
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 4800,
            data_bits: 8,
            parity: "none".to_string(),
            stop_bits: 1,
            timeout: Duration::from_secs(1),
        };
        settings.ingest.serial_ports = vec![port.clone(), port];
        let err = settings.validate().unwrap_err();
        assert!(err.contains("Duplicate channel name"));
    }

    #[test]
    fn transfer_without_server_rejected() {
        let mut settings = load(SAMPLE);
        settings.transfer.server = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zone_file_flag_requires_path() {
        let mut settings = load(SAMPLE);
        settings.transfer.use_zone_file = true;
        settings.transfer.zone_file = None;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn filter_needs_types_unless_save_all() {
        let mut settings = load(SAMPLE);
        settings.ingest.sentence_types.clear();
        assert!(settings.validate().is_err());
        settings.ingest.save_all = true;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zip_extension_rejected() {
        let mut settings = load(SAMPLE);
        settings.storage.output_extension = "zip".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn invalid_log_level_rejected() {
        let mut settings = load(SAMPLE);
        settings.application.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());
    }
}
