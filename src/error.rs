//! Error types for pano-dl
//!
//! This module provides error handling for the download engine, including:
//! - Transient request failures (network, remote API) that the retry layers absorb
//! - Durability failures (lock timeout, filesystem) that always reach the caller
//! - Validation failures for configuration and job parameters

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pano-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pano-dl
///
/// Request-level variants ([`Error::Network`], [`Error::RemoteApi`]) are retried
/// inside a request and then turned into failed points; they never abort a job.
/// Durability variants ([`Error::LockTimeout`], [`Error::FileSystem`]) are never
/// retried and abort the job, because the batch could not be persisted.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "connection_limit")
        key: Option<String>,
    },

    /// Job parameters cannot produce a sampling grid
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Network error (timeout, connection refused, TLS, ...)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The metadata API answered with a non-success HTTP status or an unreadable body
    #[error("remote API error{}: {message}", http_suffix(.status))]
    RemoteApi {
        /// HTTP status code, if the failure came from the status line
        status: Option<u16>,
        /// Response body excerpt or decode error
        message: String,
    },

    /// The shared output lock could not be acquired in time
    #[error("timed out after {timeout:?} waiting for lock {path}")]
    LockTimeout {
        /// Path of the lock file
        path: PathBuf,
        /// How long acquisition was attempted
        timeout: Duration,
    },

    /// A filesystem operation on a job file failed
    #[error(
        "failed to {operation} {path}: {source} (check that the directory is writable and the disk is not full)"
    )]
    FileSystem {
        /// Short description of what was being done (e.g., "append to")
        operation: &'static str,
        /// The file or directory involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// I/O error without path context
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encode/decode error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The job was cancelled at a batch boundary; the partial file is resumable
    #[error("job cancelled; partial output kept for resume")]
    Cancelled,

    /// Background task failed to complete (panic or runtime shutdown)
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn http_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

impl Error {
    /// Build a [`Error::Config`] for a specific key.
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Attach path and operation context to an I/O error.
    pub fn fs(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileSystem {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether this error means a batch could not be made durable.
    ///
    /// These errors abort the job instead of turning points into failed points.
    pub fn is_durability_failure(&self) -> bool {
        matches!(
            self,
            Error::LockTimeout { .. } | Error::FileSystem { .. } | Error::Io(_) | Error::Csv(_)
        )
    }
}
