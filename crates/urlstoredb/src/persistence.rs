//! Snapshot persistence
//!
//! File layout:
//! - `urls.snap`: the whole store as a single snapshot (see [`crate::snapshot`])
//!
//! A load reads the whole file into memory and decodes it. A save writes a
//! temporary file in the same directory, fsyncs it and
//! renames it over `urls.snap`. Readers see the old or the new snapshot,
//! never a partial one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::snapshot::{self, Snapshot, HEADER_LEN};

/// Snapshot file name inside the data directory
pub const SNAPSHOT_FILE: &str = "urls.snap";

/// Reads and writes the store snapshot in a data directory
pub struct PersistenceManager {
    /// Data directory
    dir: PathBuf,

    /// `dir/urls.snap`
    path: PathBuf,

    /// Extra attempts after a failed I/O operation
    retries: u32,

    /// Delay before the first retry, doubled on each further one
    backoff: Duration,
}

impl PersistenceManager {
    /// Use `dir` for the snapshot, creating it if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            path: dir.join(SNAPSHOT_FILE),
            retries: 0,
            backoff: Duration::ZERO,
        })
    }

    /// Retry failed I/O up to `retries` more times with doubling backoff
    pub fn with_retry(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    /// Location of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether a snapshot has been written
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the snapshot, or `None` if none was ever saved
    ///
    /// Corruption is never retried; only I/O errors are.
    pub fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        self.with_retry_policy("load", || self.read_snapshot())
    }

    /// Atomically replace the snapshot
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let bytes = snapshot::encode(snapshot)?;
        self.with_retry_policy("save", || self.write_atomic(&bytes))?;
        debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            entries = snapshot.entries.len(),
            "snapshot saved"
        );
        Ok(())
    }

    fn read_snapshot(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < HEADER_LEN {
            return Err(PersistenceError::Corrupt(format!(
                "{} is {} bytes, shorter than a header",
                self.path.display(),
                bytes.len()
            )));
        }
        snapshot::decode(&bytes).map(Some)
    }

    fn write_atomic(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn with_retry_policy<T>(
        &self,
        op: &str,
        mut attempt: impl FnMut() -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let mut delay = self.backoff;
        let mut tries = 0;
        loop {
            match attempt() {
                Err(PersistenceError::Io(e)) if tries < self.retries => {
                    tries += 1;
                    warn!(
                        op,
                        attempt = tries,
                        retries = self.retries,
                        error = %e,
                        "snapshot I/O failed, retrying"
                    );
                    thread::sleep(delay);
                    delay = next_backoff(delay);
                }
                result => return result,
            }
        }
    }
}

/// Doubled retry delay, saturating instead of overflowing
fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}
