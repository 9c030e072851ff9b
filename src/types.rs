//! Core types: coordinates, grid points, download records and engine events

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A WGS-84 position in decimal degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

impl Coordinate {
    /// Create a coordinate from latitude and longitude in degrees
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Latitude in degrees (positive north)
    pub fn latitude(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees (positive east)
    pub fn longitude(&self) -> f64 {
        self.lon
    }

    /// Whether both components are finite and inside their valid ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// One sample location of a job's grid
///
/// `row_index` counts north steps from the origin and `col_index` east steps,
/// both possibly negative.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridPoint {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Row offset from the origin (north positive)
    pub row_index: i64,
    /// Column offset from the origin (east positive)
    pub col_index: i64,
}

impl GridPoint {
    /// Resume key: the exact bit patterns of the two coordinates.
    ///
    /// Coordinates are written with shortest round-trip formatting, so a value
    /// read back from the CSV has the same bits as the generated one.
    pub fn coordinate_key(&self) -> (u64, u64) {
        (self.latitude.to_bits(), self.longitude.to_bits())
    }
}

/// Outcome status of a metadata lookup, as stored in the `status` column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PanoStatus {
    /// A pano with a capture date was found
    Ok,
    /// No pano near the location
    ZeroResults,
    /// A pano was found but the API reported no capture date
    NoDate,
    /// Generic error answer
    Error,
    /// The API key was rejected
    RequestDenied,
    /// The request parameters were rejected
    InvalidRequest,
    /// Quota exceeded
    OverQueryLimit,
    /// Server-side error answer, or an unrecognized status string
    UnknownError,
    /// The address or pano could not be found
    NotFound,
}

impl PanoStatus {
    /// Map an API status string; `None` for strings outside the known set.
    pub fn from_api(status: &str) -> Option<Self> {
        let status = match status {
            "OK" => PanoStatus::Ok,
            "ZERO_RESULTS" => PanoStatus::ZeroResults,
            "NO_DATE" => PanoStatus::NoDate,
            "ERROR" => PanoStatus::Error,
            "REQUEST_DENIED" => PanoStatus::RequestDenied,
            "INVALID_REQUEST" => PanoStatus::InvalidRequest,
            "OVER_QUERY_LIMIT" => PanoStatus::OverQueryLimit,
            "UNKNOWN_ERROR" => PanoStatus::UnknownError,
            "NOT_FOUND" => PanoStatus::NotFound,
            _ => return None,
        };
        Some(status)
    }

    /// Column value for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            PanoStatus::Ok => "OK",
            PanoStatus::ZeroResults => "ZERO_RESULTS",
            PanoStatus::NoDate => "NO_DATE",
            PanoStatus::Error => "ERROR",
            PanoStatus::RequestDenied => "REQUEST_DENIED",
            PanoStatus::InvalidRequest => "INVALID_REQUEST",
            PanoStatus::OverQueryLimit => "OVER_QUERY_LIMIT",
            PanoStatus::UnknownError => "UNKNOWN_ERROR",
            PanoStatus::NotFound => "NOT_FOUND",
        }
    }
}

impl std::fmt::Display for PanoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of job output: the result of querying one grid point
///
/// Field order is the CSV column order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Queried latitude (the grid point)
    pub query_lat: f64,
    /// Queried longitude (the grid point)
    pub query_lon: f64,
    /// RFC 3339 local time at which the answer was received
    pub query_timestamp: String,
    /// Latitude of the nearest pano
    pub pano_lat: Option<f64>,
    /// Longitude of the nearest pano
    pub pano_lon: Option<f64>,
    /// Pano identifier
    pub pano_id: Option<String>,
    /// Capture date as returned by the API (e.g. "2019-05")
    pub capture_date: Option<String>,
    /// Copyright line
    pub copyright_info: Option<String>,
    /// Lookup status
    pub status: PanoStatus,
}

/// A grid point that could not be fetched in any pass
#[derive(Clone, Debug, PartialEq)]
pub struct FailedPoint {
    /// The point that failed
    pub point: GridPoint,
    /// Last error observed for it
    pub last_error: String,
}

/// Where a job's records came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// In-memory artifact cache
    Cache,
    /// Existing compressed artifact on disk
    Artifact,
    /// Downloaded (fully or resumed) during this run
    Downloaded,
}

/// Counters for one engine run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobStats {
    /// Points in the job's grid
    pub total_points: usize,
    /// Points found in the partial file at start
    pub resumed_points: usize,
    /// Records written during this run
    pub persisted_records: usize,
    /// Points that failed every pass
    pub failed_points: usize,
    /// Retry passes actually run
    pub retry_passes: u32,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Result of [`Downloader::run`](crate::Downloader::run)
#[derive(Clone, Debug)]
pub struct JobOutcome {
    /// The job fingerprint
    pub fingerprint: String,
    /// Path of the compressed artifact
    pub artifact_path: PathBuf,
    /// Every record of the artifact
    pub records: Arc<Vec<DownloadRecord>>,
    /// Points that failed permanently during this run
    pub failed_points: Vec<FailedPoint>,
    /// Where the records came from
    pub source: OutcomeSource,
    /// Run counters (zeroed for cache and artifact hits)
    pub stats: JobStats,
}

/// Event emitted during a job's lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Grid generated and resume set computed
    JobStarted {
        /// Job fingerprint
        fingerprint: String,
        /// Points in the grid
        total_points: usize,
        /// Points already present in the partial file
        already_done: usize,
    },

    /// A completed artifact short-circuited the job
    CacheHit {
        /// Job fingerprint
        fingerprint: String,
        /// Where the records were found
        source: OutcomeSource,
    },

    /// A batch was durably appended to the partial file
    BatchPersisted {
        /// 0 for the main pass, then 1..=max_retries
        pass: u32,
        /// Batch number within the pass
        batch_index: usize,
        /// Records written by this batch
        records: usize,
        /// Points of this batch queued for retry
        failed: usize,
        /// Points with a record so far (including resumed ones)
        completed: usize,
        /// Points in the grid
        total_points: usize,
    },

    /// A retry pass over previously failed points is starting
    RetryPassStarted {
        /// Pass number (1-based)
        pass: u32,
        /// Points being retried
        points: usize,
    },

    /// Points failed every pass and were written to the failed-points file
    PointsFailed {
        /// Job fingerprint
        fingerprint: String,
        /// Number of points
        count: usize,
        /// Failed-points file
        path: PathBuf,
    },

    /// The compressed artifact was written
    JobComplete {
        /// Job fingerprint
        fingerprint: String,
        /// Records in the artifact
        records: usize,
        /// Points that failed permanently
        failed_points: usize,
        /// Artifact path
        path: PathBuf,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            PanoStatus::Ok,
            PanoStatus::ZeroResults,
            PanoStatus::NoDate,
            PanoStatus::Error,
            PanoStatus::RequestDenied,
            PanoStatus::InvalidRequest,
            PanoStatus::OverQueryLimit,
            PanoStatus::UnknownError,
            PanoStatus::NotFound,
        ] {
            assert_eq!(PanoStatus::from_api(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn unknown_status_string_is_not_mapped() {
        assert_eq!(PanoStatus::from_api("SOMETHING_NEW"), None);
        assert_eq!(PanoStatus::from_api("ok"), None);
    }

    #[test]
    fn coordinate_validity() {
        assert!(Coordinate::new(48.8566, 2.3522).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::RetryPassStarted { pass: 2, points: 7 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "retry_pass_started");
        assert_eq!(json["points"], 7);
    }
}
