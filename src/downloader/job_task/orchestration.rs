//! Job orchestration -- top-level lifecycle from cache lookup to artifact.

use std::sync::Arc;
use std::time::Instant;

use crate::cache::ArtifactCache;
use crate::error::{Error, Result};
use crate::grid::generate_grid;
use crate::progress::{ProgressTracker, Resume};
use crate::types::{DownloadRecord, Event, FailedPoint, JobOutcome, JobStats, OutcomeSource};

use super::batching::run_pass;
use super::context::{JobContext, Progress};
use super::finalization::{finalize, load, resume_compression};
use super::retry_passes::{record_failures, retry_failed};

/// Run one job to completion.
///
/// 1. Return cached records if the artifact is in memory and still on disk
/// 2. Generate the grid and inspect the files on disk
/// 3. Load an existing artifact, or finish an interrupted compression
/// 4. Otherwise fetch the remaining points, run retry passes, record
///    permanent failures and finalize
pub(crate) async fn run_job(ctx: &JobContext, cache: &ArtifactCache) -> Result<JobOutcome> {
    let started = Instant::now();

    if let Some(records) = cache.get(&ctx.paths.compressed) {
        if ctx.paths.compressed.exists() {
            tracing::debug!(fingerprint = %ctx.fingerprint, "Artifact served from cache");
            ctx.emit(Event::CacheHit {
                fingerprint: ctx.fingerprint.clone(),
                source: OutcomeSource::Cache,
            });
            return Ok(outcome(
                ctx,
                records,
                Vec::new(),
                OutcomeSource::Cache,
                JobStats::default(),
            ));
        }
        tracing::info!(
            fingerprint = %ctx.fingerprint,
            path = %ctx.paths.compressed.display(),
            "Cached artifact no longer on disk, dropping cache entry"
        );
        cache.remove(&ctx.paths.compressed);
    }

    let job = &ctx.job;
    let grid = generate_grid(job.origin, job.width_m, job.height_m, job.step_m)?;
    tokio::fs::create_dir_all(&job.output_dir)
        .await
        .map_err(|e| Error::fs("create directory", &job.output_dir, e))?;

    let tracker = ProgressTracker::new(ctx.paths.clone());
    let grid_for_inspect = grid.clone();
    let resume =
        tokio::task::spawn_blocking(move || tracker.inspect(&grid_for_inspect)).await??;

    let (already_done, remaining) = match resume {
        Resume::Complete(path) => {
            tracing::info!(
                fingerprint = %ctx.fingerprint,
                path = %path.display(),
                "Artifact already exists, loading"
            );
            let records = Arc::new(load(&path).await?);
            cache.insert(ctx.paths.compressed.clone(), Arc::clone(&records));
            ctx.emit(Event::CacheHit {
                fingerprint: ctx.fingerprint.clone(),
                source: OutcomeSource::Artifact,
            });
            return Ok(outcome(
                ctx,
                records,
                Vec::new(),
                OutcomeSource::Artifact,
                JobStats::default(),
            ));
        }
        Resume::Uncompressed(_) => {
            let records = resume_compression(ctx).await?;
            let stats = JobStats {
                total_points: grid.len(),
                resumed_points: grid.len(),
                elapsed: started.elapsed(),
                ..JobStats::default()
            };
            return Ok(complete(ctx, cache, records, Vec::new(), stats));
        }
        Resume::Partial {
            already_done,
            remaining,
        } => (already_done, remaining),
    };

    tracing::info!(
        fingerprint = %ctx.fingerprint,
        total_points = grid.len(),
        already_done = already_done,
        remaining = remaining.len(),
        batch_size = ctx.config.download.batch_size,
        connection_limit = ctx.config.download.connection_limit,
        "Starting job"
    );
    ctx.emit(Event::JobStarted {
        fingerprint: ctx.fingerprint.clone(),
        total_points: grid.len(),
        already_done,
    });

    let mut progress = Progress {
        total_points: grid.len(),
        completed: already_done,
        persisted: 0,
    };

    let main_pass = run_pass(ctx, &remaining, 0, &mut progress).await?;
    if !main_pass.failed.is_empty() {
        tracing::warn!(
            fingerprint = %ctx.fingerprint,
            failed = main_pass.failed.len(),
            "Main pass finished with failed points"
        );
    }

    let retried = retry_failed(ctx, main_pass.failed, &mut progress).await?;
    record_failures(ctx, &retried.failed).await?;

    let records = finalize(ctx).await?;
    let stats = JobStats {
        total_points: grid.len(),
        resumed_points: already_done,
        persisted_records: progress.persisted,
        failed_points: retried.failed.len(),
        retry_passes: retried.passes,
        elapsed: started.elapsed(),
    };
    Ok(complete(ctx, cache, records, retried.failed, stats))
}

/// Cache the finished artifact, announce it and build the outcome.
fn complete(
    ctx: &JobContext,
    cache: &ArtifactCache,
    records: Vec<DownloadRecord>,
    failed_points: Vec<FailedPoint>,
    stats: JobStats,
) -> JobOutcome {
    let records = Arc::new(records);
    cache.insert(ctx.paths.compressed.clone(), Arc::clone(&records));
    ctx.emit(Event::JobComplete {
        fingerprint: ctx.fingerprint.clone(),
        records: records.len(),
        failed_points: failed_points.len(),
        path: ctx.paths.compressed.clone(),
    });
    outcome(ctx, records, failed_points, OutcomeSource::Downloaded, stats)
}

fn outcome(
    ctx: &JobContext,
    records: Arc<Vec<DownloadRecord>>,
    failed_points: Vec<FailedPoint>,
    source: OutcomeSource,
    stats: JobStats,
) -> JobOutcome {
    JobOutcome {
        fingerprint: ctx.fingerprint.clone(),
        artifact_path: ctx.paths.compressed.clone(),
        records,
        failed_points,
        source,
        stats,
    }
}
