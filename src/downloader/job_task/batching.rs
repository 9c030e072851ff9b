//! Batch fetching -- concurrent lookups within a batch, sequential batches,
//! and the durable append that checkpoints each batch.

use futures::stream::{self, StreamExt};

use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::{DownloadRecord, Event, FailedPoint, GridPoint};

use super::context::{JobContext, Progress};

/// Outcome of one pass over a list of points
#[derive(Debug, Default)]
pub(super) struct PassResult {
    /// Records appended during the pass
    pub(super) persisted: usize,
    /// Points that produced no record, in input order
    pub(super) failed: Vec<FailedPoint>,
}

/// Run `points` through the fetch pipeline in batches of `batch_size`.
///
/// Each batch is fully fetched and appended before the next one starts. The
/// shutdown token is checked before every batch, never during one.
pub(super) async fn run_pass(
    ctx: &JobContext,
    points: &[GridPoint],
    pass: u32,
    progress: &mut Progress,
) -> Result<PassResult> {
    let batch_size = ctx.config.download.batch_size;
    let mut result = PassResult::default();

    for (batch_index, batch) in points.chunks(batch_size).enumerate() {
        if ctx.cancel_token.is_cancelled() {
            tracing::info!(
                fingerprint = %ctx.fingerprint,
                pass = pass,
                batch_index = batch_index,
                completed = progress.completed,
                total_points = progress.total_points,
                "Cancellation requested, stopping before next batch"
            );
            return Err(Error::Cancelled);
        }

        let (records, failed) = fetch_batch(ctx, batch).await;
        let written = persist_batch(ctx, records).await?;

        progress.completed += written;
        progress.persisted += written;
        result.persisted += written;

        tracing::debug!(
            fingerprint = %ctx.fingerprint,
            pass = pass,
            batch_index = batch_index,
            records = written,
            failed = failed.len(),
            completed = progress.completed,
            total_points = progress.total_points,
            "Batch persisted"
        );
        ctx.emit(Event::BatchPersisted {
            pass,
            batch_index,
            records: written,
            failed: failed.len(),
            completed: progress.completed,
            total_points: progress.total_points,
        });

        result.failed.extend(failed);
    }

    Ok(result)
}

/// Query every point of a batch with at most `connection_limit` requests in flight.
///
/// Transient errors are retried inside each request. Records come back in
/// batch order regardless of completion order.
pub(super) async fn fetch_batch(
    ctx: &JobContext,
    batch: &[GridPoint],
) -> (Vec<DownloadRecord>, Vec<FailedPoint>) {
    let concurrency = ctx.config.download.connection_limit.max(1);
    let retry_config = &ctx.config.retry;
    let api_key = ctx.job.api_key.as_str();

    let mut results: Vec<(usize, GridPoint, Result<DownloadRecord>)> =
        stream::iter(batch.iter().copied().enumerate())
            .map(|(index, point)| async move {
                let result = with_retry(retry_config, || ctx.provider.fetch(&point, api_key)).await;
                (index, point, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
    results.sort_by_key(|(index, _, _)| *index);

    let mut records = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for (_, point, result) in results {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    fingerprint = %ctx.fingerprint,
                    lat = point.latitude,
                    lon = point.longitude,
                    i = point.row_index,
                    j = point.col_index,
                    error = %e,
                    "Metadata lookup failed, queued for retry pass"
                );
                failed.push(FailedPoint {
                    point,
                    last_error: e.to_string(),
                });
            }
        }
    }

    (records, failed)
}

/// Append a batch's records through the shared writer on a blocking thread.
pub(super) async fn persist_batch(ctx: &JobContext, records: Vec<DownloadRecord>) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    let writer = ctx.writer.clone();
    tokio::task::spawn_blocking(move || writer.write_batch(&records)).await?
}
