//! # pano-dl
//!
//! Resumable, concurrency-bounded downloader for street-level imagery metadata.
//!
//! ## Design Philosophy
//!
//! pano-dl is designed to be:
//! - **Resumable** - Every batch is durably appended before the next starts; a
//!   killed run picks up where it stopped
//! - **Bounded** - `batch_size` caps staged work and `connection_limit` caps
//!   requests in flight
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! A job samples a rectangular grid around an origin, asks the metadata API for
//! the nearest pano at every point, and writes the answers to
//! `{fingerprint}.csv.gz`. Points that keep failing are listed in
//! `{fingerprint}_failed_points.csv`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pano_dl::{Config, Coordinate, Downloader, Job};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // GMAPS_API_KEY and GSV_DOWNLOAD_PATH are read from the environment
//!     let config = Config::from_env();
//!     let job = Job::new(
//!         &config,
//!         "Paris, France",
//!         Coordinate::new(48.8566, 2.3522),
//!         1000.0,
//!         1000.0,
//!         20.0,
//!     )?;
//!
//!     let downloader = Downloader::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let outcome = downloader.run(&job).await?;
//!     println!("{} records in {}", outcome.records.len(), outcome.artifact_path.display());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// CSV encoding, compression and loading of job output
pub mod artifact;
/// In-memory cache of finished artifacts
pub mod cache;
/// Configuration types
pub mod config;
/// Download engine (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Sampling grid generation
pub mod grid;
/// Job definition and file layout
pub mod job;
/// Resume detection
pub mod progress;
/// Metadata provider trait and HTTP implementation
pub mod provider;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Crash-safe batch appends under a file lock
pub mod writer;

// Re-export commonly used types
pub use cache::ArtifactCache;
pub use config::Config;
pub use downloader::Downloader;
pub use error::{Error, Result};
pub use job::{Job, JobPaths};
pub use provider::{HttpMetadataProvider, MetadataProvider};
pub use types::{
    Coordinate, DownloadRecord, Event, FailedPoint, GridPoint, JobOutcome, JobStats,
    OutcomeSource, PanoStatus,
};

/// Run a job, stopping it cleanly on a termination signal.
///
/// When a signal arrives the downloader is shut down and the job returns
/// [`Error::Cancelled`] at its next batch boundary; the partial file is kept
/// and a later run resumes it.
///
/// On Unix this listens for SIGTERM and SIGINT; elsewhere for Ctrl-C.
///
/// # Example
///
/// ```no_run
/// use pano_dl::{Config, Coordinate, Downloader, Job, run_until_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_env();
///     let job = Job::new(&config, "Bonn", Coordinate::new(50.7374, 7.0982), 500.0, 500.0, 25.0)?;
///     let downloader = Downloader::new(config)?;
///
///     // Run with automatic signal handling
///     let outcome = run_until_signal(&downloader, &job).await?;
///     println!("{} failed points", outcome.failed_points.len());
///
///     Ok(())
/// }
/// ```
pub async fn run_until_signal(downloader: &Downloader, job: &Job) -> Result<JobOutcome> {
    let run = downloader.run(job);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            downloader.shutdown();
            // Let the current batch finish and persist
            run.await
        }
    }
}

/// Resolve on SIGTERM or SIGINT; Ctrl-C when the Unix handlers are unavailable.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "Stopping job at next batch boundary");
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, waiting for Ctrl-C");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "Ctrl-C", "Stopping job at next batch boundary"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C; job runs to completion");
            std::future::pending::<()>().await;
        }
    }
}
