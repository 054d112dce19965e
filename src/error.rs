//! Custom error types for the application.
//!
//! This module defines the primary error type, `RelayError`, for the entire
//! pipeline. Using the `thiserror` crate, it provides a centralized way to
//! classify the failures the workers have to live with:
//!
//! - **`Config` / `Configuration`**: file- or format-level loading errors vs.
//!   semantic errors caught by validation. Both are fatal at startup; no
//!   partial pipeline is started.
//! - **`Io` / `Serial`**: transport and filesystem failures. Serial read
//!   glitches are *not* surfaced through this type — they are counted inside
//!   the source and the loop continues (degraded-but-alive).
//! - **`ConnectionLost`**: a network source dropped its link. The source's
//!   reconnect machine owns recovery; callers only see this variant when a
//!   link cannot be established at all.
//! - **`Archive`**: a copy/compress step failed. The archiver aborts the
//!   remaining steps without deleting unconfirmed artifacts.
//! - **`Transfer`**: an upload-cycle failure. The current cycle is abandoned,
//!   local files are untouched, and the next cycle retries with a fresh
//!   connection.
//! - **`ClockInvalid`**: the system clock cannot be trusted; timestamps would
//!   be meaningless, so this is fatal at startup.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Connection to {remote} lost: {reason}")]
    ConnectionLost { remote: String, reason: String },

    #[error("Archive step failed for '{path}': {reason}")]
    Archive { path: String, reason: String },

    #[error("Compression error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Zone file '{path}' line {line}: {reason}")]
    ZoneFile {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Storage root '{0}' is not writable")]
    StorageNotWritable(String),

    #[error("System clock invalid: {0}")]
    ClockInvalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_error_carries_path_context() {
        let err = RelayError::Archive {
            path: "/data/20240101-120000-gps0.dat".into(),
            reason: "copy target missing after copy".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("20240101-120000-gps0.dat"));
        assert!(msg.contains("copy target missing"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: RelayError = io.into();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
