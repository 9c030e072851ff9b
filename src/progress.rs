//! Resume detection for a job's output files

use crate::artifact::visit_records;
use crate::error::{Error, Result};
use crate::job::JobPaths;
use crate::types::GridPoint;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

/// What a job still has to do, judged from the files on disk
#[derive(Clone, Debug, PartialEq)]
pub enum Resume {
    /// The compressed artifact exists; nothing to download
    Complete(PathBuf),
    /// A finalized `.csv` exists without a partial file; only compression is left
    Uncompressed(PathBuf),
    /// Some or none of the grid has been queried
    Partial {
        /// Grid points found in the partial file
        already_done: usize,
        /// Grid points still to query, in grid order
        remaining: Vec<GridPoint>,
    },
}

/// Reads a job's partial output to decide where a run starts
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    paths: JobPaths,
}

impl ProgressTracker {
    /// Tracker for the files at `paths`
    pub fn new(paths: JobPaths) -> Self {
        Self { paths }
    }

    /// Compare `grid` against the files on disk.
    ///
    /// A missing partial file means nothing was done. Rows that cannot be
    /// parsed are ignored, so their points are queried again.
    pub fn inspect(&self, grid: &[GridPoint]) -> Result<Resume> {
        if self.paths.compressed.exists() {
            return Ok(Resume::Complete(self.paths.compressed.clone()));
        }
        if !self.paths.downloading.exists() && self.paths.csv.exists() {
            return Ok(Resume::Uncompressed(self.paths.csv.clone()));
        }

        let done = self.completed_keys()?;
        let remaining: Vec<GridPoint> = grid
            .iter()
            .filter(|p| !done.contains(&p.coordinate_key()))
            .copied()
            .collect();

        Ok(Resume::Partial {
            already_done: grid.len() - remaining.len(),
            remaining,
        })
    }

    /// Bit patterns of every `(query_lat, query_lon)` in the partial file.
    ///
    /// Only rows that decode into a full record count; a row torn inside its
    /// status column is treated as not done.
    fn completed_keys(&self) -> Result<HashSet<(u64, u64)>> {
        let path = &self.paths.downloading;
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(Error::fs("open", path, e)),
        };

        let mut keys = HashSet::new();
        let skipped = visit_records(BufReader::new(file), path, |record| {
            keys.insert((record.query_lat.to_bits(), record.query_lon.to_bits()));
        })?;

        if skipped > 0 {
            tracing::warn!(
                path = %path.display(),
                skipped = skipped,
                "Ignoring malformed rows in partial output; their points will be queried again"
            );
        }
        tracing::debug!(path = %path.display(), completed = keys.len(), "Loaded resume set");
        Ok(keys)
    }
}
