//! Bounded segment files with size-based rotation.
//!
//! Each ingestion channel owns exactly one open segment at a time. The byte
//! counter tracks exactly what has been written, so a closed segment's count
//! equals its file size. Rotation is checked after each write, never on a
//! timer — bursty input can overshoot the threshold by at most one line.

use crate::error::AppResult;
use chrono::Utc;
use log::info;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamp stem shared by active segments and their archives.
const SEGMENT_STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// A closed, immutable segment ready for archival.
#[derive(Debug)]
pub struct ClosedSegment {
    pub path: PathBuf,
    pub bytes: u64,
}

/// The currently-open output file of one ingestion channel.
pub struct SegmentWriter {
    dir: PathBuf,
    channel: String,
    extension: String,
    rotate_bytes: u64,
    file: File,
    path: PathBuf,
    bytes: u64,
}

impl SegmentWriter {
    /// Open a fresh segment for `channel` under `dir`.
    pub fn create(
        dir: &Path,
        channel: &str,
        extension: &str,
        rotate_bytes: u64,
    ) -> AppResult<Self> {
        let (file, path) = open_segment(dir, channel, extension)?;
        info!("{channel}: writing to {}", path.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            channel: channel.to_string(),
            extension: extension.to_string(),
            rotate_bytes,
            file,
            path,
            bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Append one timestamped line (a trailing newline is added). Returns the
    /// just-closed segment when this write pushed the byte count past the
    /// rotation threshold.
    pub fn append(&mut self, line: &str) -> AppResult<Option<ClosedSegment>> {
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.bytes += line.len() as u64 + 1;

        if self.bytes > self.rotate_bytes {
            return self.rotate().map(Some);
        }
        Ok(None)
    }

    /// Close the current segment and open a new one. The new segment must
    /// exist before the closed one is released for archival, so a rotation
    /// can never leave the channel without a live file.
    fn rotate(&mut self) -> AppResult<ClosedSegment> {
        let (new_file, new_path) = open_segment(&self.dir, &self.channel, &self.extension)?;

        let old_file = std::mem::replace(&mut self.file, new_file);
        old_file.sync_all()?;
        drop(old_file);

        let closed = ClosedSegment {
            path: std::mem::replace(&mut self.path, new_path),
            bytes: self.bytes,
        };
        self.bytes = 0;
        info!(
            "{}: segment {} complete ({} bytes), now writing to {}",
            self.channel,
            closed.path.display(),
            closed.bytes,
            self.path.display()
        );
        Ok(closed)
    }
}

fn open_segment(dir: &Path, channel: &str, extension: &str) -> AppResult<(File, PathBuf)> {
    let stem = Utc::now().format(SEGMENT_STAMP_FORMAT).to_string();
    // A closed segment is immutable: a rotation inside the same second must
    // not reopen the file that was just handed to the archiver, so collide
    // into a numbered name instead.
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{stem}-{channel}.{extension}")
        } else {
            format!("{stem}-{channel}.{attempt}.{extension}")
        };
        let path = dir.join(name);
        match OpenOptions::new().create_new(true).append(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(err.into()),
        }
    }
}
