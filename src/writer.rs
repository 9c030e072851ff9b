//! Crash-safe appends to a job's shared partial file
//!
//! Every batch is staged in its own temp file, then appended to the shared
//! `.csv.downloading` file while holding a cooperative lock file. Writers in
//! other processes using the same lock path serialize with this one, so rows
//! from different batches never interleave.
//!
//! The lock is a plain file created with `O_EXCL` semantics
//! ([`OpenOptions::create_new`]). It records who holds it; a lock older than
//! [`LockConfig::stale_after`] is assumed to belong to a killed process and is
//! removed.

use crate::artifact::{encode_rows, header_line};
use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::types::DownloadRecord;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Distinguishes temp files of batches staged in the same millisecond
static BATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Appends batches of records to one shared CSV file
#[derive(Clone, Debug)]
pub struct AtomicWriter {
    path: PathBuf,
    lock_path: PathBuf,
    lock: LockConfig,
}

impl AtomicWriter {
    /// Writer for `shared_path`, locking through `{shared_path}.lock`
    pub fn new(shared_path: impl Into<PathBuf>, lock: LockConfig) -> Self {
        let path = shared_path.into();
        let lock_path = sibling(&path, ".lock");
        Self {
            path,
            lock_path,
            lock,
        }
    }

    /// The shared file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lock file
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Durably append `records` to the shared file.
    ///
    /// The header is written first when the shared file is new. Returns once
    /// the rows are synced to disk. An empty batch touches nothing.
    pub fn write_batch(&self, records: &[DownloadRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch_id = next_batch_id();
        let tmp = sibling(&self.path, &format!(".batch_{batch_id}.tmp"));

        let result = self.stage_and_append(records, &batch_id, &tmp);
        if let Err(e) = std::fs::remove_file(&tmp)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove batch temp file");
        }

        match result {
            Ok(()) => {
                tracing::debug!(
                    path = %self.path.display(),
                    batch_id = %batch_id,
                    records = records.len(),
                    "Batch appended"
                );
                Ok(records.len())
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    batch_id = %batch_id,
                    error = %e,
                    "Failed to persist batch"
                );
                Err(e)
            }
        }
    }

    /// Create a header-only shared file if it does not exist yet.
    pub fn ensure_initialized(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let _guard = FileLock::acquire(&self.lock_path, &next_batch_id(), &self.lock)?;
        let mut file = self.open_shared()?;
        self.prepare_for_append(&mut file)?;
        file.sync_data()
            .map_err(|e| Error::fs("sync", &self.path, e))
    }

    fn stage_and_append(&self, records: &[DownloadRecord], batch_id: &str, tmp: &Path) -> Result<()> {
        let rows = encode_rows(records)?;
        std::fs::write(tmp, &rows).map_err(|e| Error::fs("write batch file", tmp, e))?;

        let _guard = FileLock::acquire(&self.lock_path, batch_id, &self.lock)?;

        let mut file = self.open_shared()?;
        self.prepare_for_append(&mut file)?;

        let mut staged = File::open(tmp).map_err(|e| Error::fs("open", tmp, e))?;
        self.append_rows(&mut file, &mut staged)
    }

    /// Copy `rows` to the end of the shared file and sync it.
    ///
    /// On failure the file is truncated back to its previous length, so a
    /// batch is either fully visible or not at all. Must be called with the
    /// lock held.
    fn append_rows(&self, file: &mut File, rows: &mut impl Read) -> Result<()> {
        let len_before = file
            .metadata()
            .map_err(|e| Error::fs("stat", &self.path, e))?
            .len();

        let result = std::io::copy(rows, file)
            .and_then(|_| file.flush())
            .map_err(|e| Error::fs("append to", &self.path, e))
            .and_then(|()| file.sync_data().map_err(|e| Error::fs("sync", &self.path, e)));

        if result.is_err() {
            match file.set_len(len_before).and_then(|()| file.sync_data()) {
                Ok(()) => tracing::warn!(
                    path = %self.path.display(),
                    len = len_before,
                    "Rolled back partially appended batch"
                ),
                Err(e) => tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to roll back partially appended batch"
                ),
            }
        }
        result
    }

    fn open_shared(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| Error::fs("open", &self.path, e))
    }

    /// Write the header into an empty file, or terminate a torn last row.
    fn prepare_for_append(&self, file: &mut File) -> Result<()> {
        let len = file
            .metadata()
            .map_err(|e| Error::fs("stat", &self.path, e))?
            .len();

        if len == 0 {
            return file
                .write_all(header_line().as_bytes())
                .map_err(|e| Error::fs("append to", &self.path, e));
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|e| Error::fs("read", &self.path, e))?;
        if last[0] != b'\n' {
            tracing::warn!(path = %self.path.display(), "Partial file ends mid-row; terminating it");
            file.write_all(b"\n")
                .map_err(|e| Error::fs("append to", &self.path, e))?;
        }
        Ok(())
    }
}

/// Exclusive hold on a lock file; released on drop
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Create the lock file at `path`, polling until it is free.
    ///
    /// Fails with [`Error::LockTimeout`] after `config.timeout`.
    pub fn acquire(path: &Path, batch_id: &str, config: &LockConfig) -> Result<Self> {
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let owner = format!(
                        "pid={}\ntimestamp={}\nbatch={}\n",
                        std::process::id(),
                        chrono::Local::now().to_rfc3339(),
                        batch_id
                    );
                    let lock = Self {
                        path: path.to_path_buf(),
                    };
                    // Owner info is diagnostic only
                    if let Err(e) = file.write_all(owner.as_bytes()) {
                        tracing::debug!(path = %path.display(), error = %e, "Could not record lock owner");
                    }
                    return Ok(lock);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::remove_if_stale(path, config) {
                        continue;
                    }
                    if started.elapsed() >= config.timeout {
                        return Err(Error::LockTimeout {
                            path: path.to_path_buf(),
                            timeout: config.timeout,
                        });
                    }
                    std::thread::sleep(config.poll_interval);
                }
                Err(e) => return Err(Error::fs("create lock", path, e)),
            }
        }
    }

    /// The lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn remove_if_stale(path: &Path, config: &LockConfig) -> bool {
        let Some(stale_after) = config.stale_after else {
            return false;
        };
        match lock_age(path) {
            Some(age) if age >= stale_after => {
                let owner = std::fs::read_to_string(path).unwrap_or_default();
                Self::take_stale(path, &owner, stale_after)
            }
            _ => false,
        }
    }

    /// Move the stale lock aside and delete it, provided it is still the lock
    /// last seen with `owner`.
    ///
    /// The rename is atomic, so of several processes only one gets the file.
    /// If another process replaced the lock between the staleness check and
    /// the rename, its lock is linked back into place untouched.
    fn take_stale(path: &Path, owner: &str, stale_after: Duration) -> bool {
        let aside = sibling(path, &format!(".stale_{}", next_batch_id()));
        if std::fs::rename(path, &aside).is_err() {
            return false;
        }

        let taken = std::fs::read_to_string(&aside).unwrap_or_default();
        let still_stale = lock_age(&aside).is_some_and(|age| age >= stale_after);
        if taken != owner || !still_stale {
            tracing::debug!(path = %path.display(), "Lock changed hands before takeover; restoring it");
            if let Err(e) = std::fs::hard_link(&aside, path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to restore lock file");
            }
            let _ = std::fs::remove_file(&aside);
            return false;
        }

        tracing::warn!(
            path = %path.display(),
            owner = %owner.replace('\n', " "),
            "Removing stale lock file"
        );
        if let Err(e) = std::fs::remove_file(&aside) {
            tracing::warn!(path = %aside.display(), error = %e, "Failed to delete stale lock file");
        }
        true
    }
}

/// Time since the lock file was last modified
fn lock_age(path: &Path) -> Option<Duration> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lock file");
        }
    }
}

fn next_batch_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!(
        "{}_{}_{}",
        std::process::id(),
        millis,
        BATCH_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// `path` with `suffix` appended to its file name
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
