//! Retry passes -- re-submit failed points with a linear pause between passes,
//! then record whatever still fails.

use std::time::Duration;

use crate::artifact::{remove_if_exists, write_failed_points};
use crate::error::{Error, Result};
use crate::types::{Event, FailedPoint, GridPoint};

use super::batching::run_pass;
use super::context::{JobContext, Progress};

/// Result of the retry phase
#[derive(Debug, Default)]
pub(super) struct RetryOutcome {
    /// Points that failed every pass
    pub(super) failed: Vec<FailedPoint>,
    /// Passes actually run
    pub(super) passes: u32,
}

/// Re-run failed points through the batch pipeline up to `max_retries` times.
///
/// After pass `k`, if another pass is allowed and points still fail, waits
/// `k * retry_pass_delay`. Stops early once nothing fails.
pub(super) async fn retry_failed(
    ctx: &JobContext,
    mut failed: Vec<FailedPoint>,
    progress: &mut Progress,
) -> Result<RetryOutcome> {
    let max_retries = ctx.config.download.max_retries;
    let mut passes = 0;

    for pass in 1..=max_retries {
        if failed.is_empty() {
            break;
        }

        tracing::info!(
            fingerprint = %ctx.fingerprint,
            pass = pass,
            max_retries = max_retries,
            points = failed.len(),
            "Starting retry pass"
        );
        ctx.emit(Event::RetryPassStarted {
            pass,
            points: failed.len(),
        });

        let points: Vec<GridPoint> = failed.iter().map(|f| f.point).collect();
        let result = run_pass(ctx, &points, pass, progress).await?;
        passes = pass;
        failed = result.failed;

        if pass < max_retries && !failed.is_empty() {
            pause_between_passes(ctx, pass).await?;
        }
    }

    Ok(RetryOutcome { failed, passes })
}

/// Linear backoff before the next pass; a shutdown request ends the wait.
async fn pause_between_passes(ctx: &JobContext, pass: u32) -> Result<()> {
    let delay = pass_delay(ctx.config.download.retry_pass_delay, pass);
    tracing::debug!(
        fingerprint = %ctx.fingerprint,
        pass = pass,
        delay_ms = delay.as_millis(),
        "Waiting before next retry pass"
    );

    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = ctx.cancel_token.cancelled() => Err(Error::Cancelled),
    }
}

fn pass_delay(base: Duration, pass: u32) -> Duration {
    base.saturating_mul(pass)
}

/// Write the failed-points file, or remove a stale one when nothing failed.
pub(super) async fn record_failures(ctx: &JobContext, failed: &[FailedPoint]) -> Result<()> {
    let path = ctx.paths.failed_points.clone();

    if failed.is_empty() {
        return tokio::task::spawn_blocking(move || remove_if_exists(&path)).await?;
    }

    for f in failed {
        tracing::error!(
            fingerprint = %ctx.fingerprint,
            lat = f.point.latitude,
            lon = f.point.longitude,
            i = f.point.row_index,
            j = f.point.col_index,
            error = %f.last_error,
            "Point failed every retry pass"
        );
    }

    let points = failed.to_vec();
    let write_path = path.clone();
    tokio::task::spawn_blocking(move || write_failed_points(&write_path, &points)).await??;

    tracing::warn!(
        fingerprint = %ctx.fingerprint,
        count = failed.len(),
        path = %path.display(),
        "Wrote failed points"
    );
    ctx.emit(Event::PointsFailed {
        fingerprint: ctx.fingerprint.clone(),
        count: failed.len(),
        path,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_delay_grows_linearly() {
        let base = Duration::from_secs(5);
        assert_eq!(pass_delay(base, 1), Duration::from_secs(5));
        assert_eq!(pass_delay(base, 2), Duration::from_secs(10));
        assert_eq!(pass_delay(base, 3), Duration::from_secs(15));
    }
}
