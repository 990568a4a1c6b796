//! Atomic write discipline for the archive tree.
//!
//! Every file lands via a temp name and a rename. Segment files are
//! content-addressed, so a rename that finds its target already present is a
//! success and the source is simply dropped.

use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::SegmentError;
use crate::segment::{SegmentKind, hour_str};

/// Create the directory containing `path`, and any parents, if missing.
pub fn ensure_directory(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Atomic rename that treats an existing target as success. The names are
/// content-addressed, so if the target path exists the file is already there;
/// the source is deleted instead.
pub fn rename(old: &Path, new: &Path) -> io::Result<()> {
    match std::fs::rename(old, new) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => std::fs::remove_file(old),
        Err(e) => Err(e),
    }
}

async fn rename_async(old: &Path, new: &Path) -> io::Result<()> {
    match tokio::fs::rename(old, new).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => tokio::fs::remove_file(old).await,
        Err(e) => Err(e),
    }
}

/// Write `content` to `path` atomically via `<path>.<uuid>.temp` + rename.
/// If the target already exists this silently does nothing, as a given
/// filename can only ever hold the same content.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), SegmentError> {
    let temp_path = temp_sibling(path);
    ensure_directory(path).map_err(|e| SegmentError::io(path, e))?;
    std::fs::write(&temp_path, content).map_err(|e| SegmentError::io(&temp_path, e))?;
    rename(&temp_path, path).map_err(|e| SegmentError::io(path, e))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.temp", Uuid::new_v4()));
    PathBuf::from(name)
}

/// List the file names in `path`, treating a missing directory as empty.
pub fn listdir(path: &Path) -> io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        if let Some(name) = entry?.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    Ok(names)
}

/// Incremental writer for one segment download.
///
/// Bytes stream into a temp-named file in the segment's hour directory while
/// a running SHA-256 is kept; finalizing renames the file to its
/// content-addressed name. The temp name follows the segment naming scheme
/// (`<time>-<duration>-temp-<uuid>.ts`) so that concurrent readers can
/// filter it out by parsing alone.
pub struct SegmentWriter {
    file: Option<tokio::fs::File>,
    temp_path: PathBuf,
    hour_dir: PathBuf,
    name_prefix: String,
    hasher: Sha256,
    bytes_written: u64,
}

impl SegmentWriter {
    pub async fn create(
        base_dir: &Path,
        channel: &str,
        quality: &str,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Self, SegmentError> {
        let hour_dir = base_dir
            .join(channel)
            .join(quality)
            .join(hour_str(start));
        let name_prefix = format!(
            "{}-{:.3}",
            start.format("%H:%M:%S%.3f"),
            duration.num_milliseconds() as f64 / 1000.0,
        );
        let temp_path = hour_dir.join(format!("{name_prefix}-temp-{}.ts", Uuid::new_v4()));

        tokio::fs::create_dir_all(&hour_dir)
            .await
            .map_err(|e| SegmentError::io(&hour_dir, e))?;
        let file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| SegmentError::io(&temp_path, e))?;

        Ok(Self {
            file: Some(file),
            temp_path,
            hour_dir,
            name_prefix,
            hasher: Sha256::new(),
            bytes_written: 0,
        })
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), SegmentError> {
        let file = self.file.as_mut().expect("write after finalize");
        file.write_all(chunk)
            .await
            .map_err(|e| SegmentError::io(&self.temp_path, e))?;
        self.hasher.update(chunk);
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Finalize as a `full` segment: all playlist bytes were received.
    pub async fn finalize_full(self) -> Result<PathBuf, SegmentError> {
        self.finalize(SegmentKind::Full).await
    }

    /// Finalize as a `partial` segment: keep the prefix received so far.
    pub async fn finalize_partial(self) -> Result<PathBuf, SegmentError> {
        self.finalize(SegmentKind::Partial).await
    }

    async fn finalize(mut self, kind: SegmentKind) -> Result<PathBuf, SegmentError> {
        let mut file = self.file.take().expect("finalize twice");
        file.flush()
            .await
            .map_err(|e| SegmentError::io(&self.temp_path, e))?;
        drop(file);

        let hash = URL_SAFE_NO_PAD.encode(self.hasher.finalize());
        let final_path = self
            .hour_dir
            .join(format!("{}-{}-{}.ts", self.name_prefix, kind, hash));
        rename_async(&self.temp_path, &final_path)
            .await
            .map_err(|e| SegmentError::io(&final_path, e))?;
        Ok(final_path)
    }

    /// Drop the temp file without keeping anything.
    pub async fn discard(mut self) -> Result<(), SegmentError> {
        self.file.take();
        tokio::fs::remove_file(&self.temp_path)
            .await
            .map_err(|e| SegmentError::io(&self.temp_path, e))
    }
}
