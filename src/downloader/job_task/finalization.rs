//! Job finalization -- promote the partial file, compress it and load the artifact.

use std::path::Path;

use crate::artifact::{compress, read_artifact, remove_if_exists};
use crate::error::{Error, Result};
use crate::job::JobPaths;
use crate::types::DownloadRecord;
use crate::writer::AtomicWriter;

use super::context::JobContext;

/// Turn the partial file into the compressed artifact and return its records.
///
/// A header-only partial file is created first if no batch ever wrote one.
pub(super) async fn finalize(ctx: &JobContext) -> Result<Vec<DownloadRecord>> {
    let paths = ctx.paths.clone();
    let writer = ctx.writer.clone();
    let records = tokio::task::spawn_blocking(move || promote_and_compress(&paths, &writer)).await??;

    tracing::info!(
        fingerprint = %ctx.fingerprint,
        records = records.len(),
        path = %ctx.paths.compressed.display(),
        "Artifact written"
    );
    Ok(records)
}

/// Finish a run that stopped between promotion and compression.
pub(super) async fn resume_compression(ctx: &JobContext) -> Result<Vec<DownloadRecord>> {
    tracing::info!(
        fingerprint = %ctx.fingerprint,
        path = %ctx.paths.csv.display(),
        "Found finalized CSV without artifact, compressing"
    );
    let paths = ctx.paths.clone();
    tokio::task::spawn_blocking(move || compress_and_load(&paths)).await?
}

/// Load an existing artifact.
pub(super) async fn load(path: &Path) -> Result<Vec<DownloadRecord>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_artifact(&path)).await?
}

fn promote_and_compress(paths: &JobPaths, writer: &AtomicWriter) -> Result<Vec<DownloadRecord>> {
    writer.ensure_initialized()?;
    std::fs::rename(&paths.downloading, &paths.csv)
        .map_err(|e| Error::fs("rename", &paths.downloading, e))?;
    compress_and_load(paths)
}

fn compress_and_load(paths: &JobPaths) -> Result<Vec<DownloadRecord>> {
    compress(&paths.csv, &paths.compressed)?;
    remove_if_exists(&paths.csv)?;
    read_artifact(&paths.compressed)
}
