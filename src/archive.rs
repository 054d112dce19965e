//! Verified archival of closed segments into compressed units.
//!
//! The step order is the whole point: copy into `complete/`, verify the copy,
//! delete the original only then; compress the copy, verify the container,
//! delete the uncompressed copy only then. A failure at any step aborts the
//! remaining steps — at worst a duplicate uncompressed copy survives, never
//! a lost segment.

use crate::error::{AppResult, RelayError};
use crate::segment::ClosedSegment;
use log::{info, warn};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Directory under the storage root holding archives pending transfer.
pub const COMPLETE_DIR: &str = "complete";
/// Directory under the storage root holding transferred-but-kept archives.
pub const TRANSFERRED_DIR: &str = "transferred";

/// A closed, compressed unit pending or completed transfer.
#[derive(Debug)]
pub struct ArchiveEntry {
    pub zip_path: PathBuf,
    pub compressed_bytes: u64,
}

pub struct Archiver {
    complete_dir: PathBuf,
}

impl Archiver {
    pub fn new(storage_root: &Path) -> AppResult<Self> {
        let complete_dir = storage_root.join(COMPLETE_DIR);
        fs::create_dir_all(&complete_dir)?;
        Ok(Self { complete_dir })
    }

    pub fn complete_dir(&self) -> &Path {
        &self.complete_dir
    }

    /// Move a closed segment into `complete/` and compress it.
    pub fn archive(&self, segment: &ClosedSegment) -> AppResult<ArchiveEntry> {
        let file_name = segment
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RelayError::Archive {
                path: segment.path.display().to_string(),
                reason: "segment path has no usable file name".to_string(),
            })?
            .to_string();

        let staged = self.complete_dir.join(&file_name);
        fs::copy(&segment.path, &staged)?;
        if !staged.is_file() {
            return Err(RelayError::Archive {
                path: staged.display().to_string(),
                reason: "copy target missing after copy".to_string(),
            });
        }
        // The copy is confirmed; only now may the original go.
        fs::remove_file(&segment.path)?;

        let zip_path = staged.with_extension("zip");
        if let Err(err) = compress(&staged, &zip_path, &file_name) {
            // Never let a half-written container become the only copy.
            let _ = fs::remove_file(&zip_path);
            return Err(err);
        }
        if zip_path.is_file() {
            fs::remove_file(&staged)?;
        }

        let compressed_bytes = fs::metadata(&zip_path)?.len();
        info!(
            "archived {} ({} bytes compressed)",
            zip_path.display(),
            compressed_bytes
        );
        Ok(ArchiveEntry {
            zip_path,
            compressed_bytes,
        })
    }

    /// Archive segment files left in the storage root by an unclean shutdown.
    ///
    /// Must run before any channel opens its first segment — a currently-open
    /// segment must never be swept. Per-file failures are logged and skipped;
    /// a stray that cannot be archived stays where it is.
    pub fn sweep_strays(&self, storage_root: &Path, extension: &str) -> AppResult<usize> {
        let suffix = format!(".{extension}");
        let mut swept = 0;
        for entry in fs::read_dir(storage_root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(&suffix) {
                continue;
            }

            let bytes = entry.metadata()?.len();
            let stray = ClosedSegment {
                path: path.clone(),
                bytes,
            };
            match self.archive(&stray) {
                Ok(_) => swept += 1,
                Err(err) => warn!("stray sweep: could not archive {}: {err}", path.display()),
            }
        }
        if swept > 0 {
            info!("stray sweep archived {swept} leftover segment file(s)");
        }
        Ok(swept)
    }
}

fn compress(src: &Path, dest: &Path, arc_name: &str) -> AppResult<()> {
    let mut zip = ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(arc_name, options)?;
    let mut reader = File::open(src)?;
    io::copy(&mut reader, &mut zip)?;
    zip.finish()?;
    Ok(())
}
