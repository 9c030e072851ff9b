//! The download engine facade.
//!
//! [`Downloader`] owns the shared pieces every job needs:
//! - the [`MetadataProvider`] used for lookups
//! - the [`ArtifactCache`] of finished jobs
//! - the event channel consumers subscribe to
//! - the shutdown token checked between batches
//!
//! The per-job pipeline lives in [`job_task`].

mod job_task;

use crate::cache::ArtifactCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::provider::{HttpMetadataProvider, MetadataProvider};
use crate::types::{Event, JobOutcome};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel; slow subscribers see `Lagged` beyond this
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Resumable grid metadata downloader
///
/// Cheap to clone; clones share the provider, cache, event channel and
/// shutdown state.
#[derive(Clone)]
pub struct Downloader {
    config: Arc<Config>,
    provider: Arc<dyn MetadataProvider>,
    cache: ArtifactCache,
    event_tx: broadcast::Sender<Event>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Create a downloader that queries the configured HTTP endpoint.
    ///
    /// Fails when the configuration does not validate or the HTTP client
    /// cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let provider = Arc::new(HttpMetadataProvider::new(&config)?);
        let cache = ArtifactCache::new(config.cache.capacity);
        Self::with_provider(config, provider, cache)
    }

    /// Create a downloader with a custom provider and cache.
    pub fn with_provider(
        config: Config,
        provider: Arc<dyn MetadataProvider>,
        cache: ArtifactCache,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            provider,
            cache,
            event_tx,
            shutdown: CancellationToken::new(),
        })
    }

    /// Download (or resume, or load) the job's grid.
    ///
    /// Returns the complete set of records once the compressed artifact
    /// exists. Points that failed every retry pass are listed in the outcome
    /// and in the failed-points file; they do not fail the job. Lock and
    /// filesystem errors do, as does a shutdown request
    /// ([`Error::Cancelled`]), which leaves the partial file for a later run.
    pub async fn run(&self, job: &Job) -> Result<JobOutcome> {
        job.validate()?;
        let ctx = job_task::JobContext::new(
            job.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.provider),
            self.event_tx.clone(),
            self.shutdown.clone(),
        );

        let result = job_task::run_job(&ctx, &self.cache).await;
        match &result {
            Ok(outcome) => tracing::info!(
                fingerprint = %outcome.fingerprint,
                records = outcome.records.len(),
                failed_points = outcome.failed_points.len(),
                source = ?outcome.source,
                "Job finished"
            ),
            Err(Error::Cancelled) => tracing::info!(
                fingerprint = %ctx.fingerprint,
                "Job cancelled; partial output kept for resume"
            ),
            Err(e) => tracing::error!(fingerprint = %ctx.fingerprint, error = %e, "Job failed"),
        }
        result
    }

    /// Subscribe to engine events.
    ///
    /// Only events sent after this call are received.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Stop running jobs at their next batch boundary.
    ///
    /// In-flight requests of the current batch complete and are persisted.
    /// Jobs started after shutdown fail with [`Error::Cancelled`] unless their
    /// artifact already exists.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Shutdown requested; stopping after the current batch");
        }
        self.shutdown.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// The engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The artifact cache
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }
}
