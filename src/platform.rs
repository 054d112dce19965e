//! Platform collaborators: writable storage location and clock validity.
//!
//! Both are thin seams over facilities the deployment environment provides.
//! The defaults here are enough for a fixed mount point; a removable-media
//! locator or an RTC/NTP probe plugs in behind the same traits.

use crate::archive::{COMPLETE_DIR, TRANSFERRED_DIR};
use crate::error::{AppResult, RelayError};
use chrono::{Datelike, Utc};
use std::fs;
use std::path::PathBuf;

/// Locates the storage root all segment and archive directories live under.
pub trait StorageLocator {
    fn locate(&self) -> AppResult<PathBuf>;
}

/// Uses a configured root, verifying writability with a probe file and
/// creating the archive directories.
pub struct ConfiguredStorage {
    root: PathBuf,
}

impl ConfiguredStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl StorageLocator for ConfiguredStorage {
    fn locate(&self) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let probe = self.root.join(".write_probe");
        let verdict = fs::write(&probe, b"probe").and_then(|()| fs::read(&probe));
        let _ = fs::remove_file(&probe);
        match verdict {
            Ok(content) if content == b"probe" => {}
            _ => {
                return Err(RelayError::StorageNotWritable(
                    self.root.display().to_string(),
                ))
            }
        }

        fs::create_dir_all(self.root.join(COMPLETE_DIR))?;
        fs::create_dir_all(self.root.join(TRANSFERRED_DIR))?;
        Ok(self.root.clone())
    }
}

/// Answers whether system time can be trusted for capture timestamps.
pub trait ClockCheck {
    fn check(&self) -> AppResult<()>;
}

/// Boards without an RTC boot in 1970 until time sync; refuse to log
/// meaningless timestamps.
pub struct SystemClockCheck;

impl ClockCheck for SystemClockCheck {
    fn check(&self) -> AppResult<()> {
        let now = Utc::now();
        if now.year() < 2024 {
            return Err(RelayError::ClockInvalid(format!(
                "system time reads {}",
                now.to_rfc3339()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_creates_archive_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("datalog");
        let located = ConfiguredStorage::new(root.clone()).locate().unwrap();
        assert_eq!(located, root);
        assert!(root.join(COMPLETE_DIR).is_dir());
        assert!(root.join(TRANSFERRED_DIR).is_dir());
        assert!(!root.join(".write_probe").exists());
    }

    #[test]
    fn system_clock_is_currently_valid() {
        assert!(SystemClockCheck.check().is_ok());
    }
}
