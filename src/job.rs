//! Job definition, fingerprint and on-disk file layout
//!
//! A job's fingerprint (sanitized query + grid dimensions) names every file the
//! engine touches, so two runs with identical parameters share their partial
//! output and their finished artifact.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::Coordinate;
use std::path::{Path, PathBuf};

/// One grid download: where, how large, how dense, and where to write
#[derive(Clone, Debug)]
pub struct Job {
    /// Free-form location query (e.g. "Paris, France"); only used for naming
    pub query: String,
    /// Grid center
    pub origin: Coordinate,
    /// Grid width in meters (east-west)
    pub width_m: f64,
    /// Grid height in meters (north-south)
    pub height_m: f64,
    /// Distance between neighbouring sample points in meters
    pub step_m: f64,
    /// Metadata API key
    pub api_key: String,
    /// Directory for job files
    pub output_dir: PathBuf,
}

impl Job {
    /// Build a job using the configured API key and download directory.
    ///
    /// Fails with [`Error::Config`] when no API key is configured, and with
    /// [`Error::InvalidJob`] when the grid parameters are unusable.
    pub fn new(
        config: &Config,
        query: impl Into<String>,
        origin: Coordinate,
        width_m: f64,
        height_m: f64,
        step_m: f64,
    ) -> Result<Self> {
        let api_key = config.api.api_key.clone().ok_or_else(|| {
            Error::config(
                "api.api_key",
                format!(
                    "no API key configured; set {} or api.api_key (the key needs the Street View Static API enabled)",
                    crate::config::API_KEY_ENV
                ),
            )
        })?;
        let job = Self {
            query: query.into(),
            origin,
            width_m,
            height_m,
            step_m,
            api_key,
            output_dir: config.download.download_dir.clone(),
        };
        job.validate()?;
        Ok(job)
    }

    /// Check that the job can produce a grid and a usable file name.
    pub fn validate(&self) -> Result<()> {
        if !self.origin.is_valid() {
            return Err(Error::InvalidJob(format!(
                "origin {:?} is not a valid coordinate",
                self.origin
            )));
        }
        if !(self.step_m.is_finite() && self.step_m > 0.0) {
            return Err(Error::InvalidJob(format!(
                "step must be a positive number of meters, got {}",
                self.step_m
            )));
        }
        for (name, value) in [("width", self.width_m), ("height", self.height_m)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::InvalidJob(format!(
                    "{name} must be a non-negative number of meters, got {value}"
                )));
            }
        }
        if sanitize_query(&self.query).is_empty() {
            return Err(Error::InvalidJob(format!(
                "query {:?} has no characters usable in a file name",
                self.query
            )));
        }
        Ok(())
    }

    /// The job fingerprint; see [`fingerprint`].
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.query, self.width_m, self.height_m, self.step_m)
    }

    /// Paths of every file belonging to this job.
    pub fn paths(&self) -> JobPaths {
        JobPaths::new(&self.output_dir, &self.fingerprint())
    }
}

/// Lowercase the query, turn spaces into underscores and drop anything outside `[a-z0-9_]`.
pub fn sanitize_query(query: &str) -> String {
    query
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// `{sanitized}_width_{w}_height_{h}_step_{step}` with width and height truncated to whole meters.
///
/// ```
/// assert_eq!(
///     pano_dl::job::fingerprint("Paris, France", 1000.7, 800.0, 20.0),
///     "paris_france_width_1000_height_800_step_20.0"
/// );
/// ```
pub fn fingerprint(query: &str, width_m: f64, height_m: f64, step_m: f64) -> String {
    format!(
        "{}_width_{}_height_{}_step_{:?}",
        sanitize_query(query),
        width_m.trunc() as i64,
        height_m.trunc() as i64,
        step_m
    )
}

/// File layout of one job inside its output directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobPaths {
    /// Append-only partial output: `{fp}.csv.downloading`
    pub downloading: PathBuf,
    /// Finalized, uncompressed output (transient): `{fp}.csv`
    pub csv: PathBuf,
    /// Finished artifact: `{fp}.csv.gz`
    pub compressed: PathBuf,
    /// Points that failed every pass: `{fp}_failed_points.csv`
    pub failed_points: PathBuf,
    /// Cooperative lock guarding `downloading`: `{fp}.csv.downloading.lock`
    pub lock: PathBuf,
}

impl JobPaths {
    /// Lay out the files for `fingerprint` under `dir`.
    pub fn new(dir: &Path, fingerprint: &str) -> Self {
        let csv = dir.join(format!("{fingerprint}.csv"));
        Self {
            downloading: dir.join(format!("{fingerprint}.csv.downloading")),
            compressed: dir.join(format!("{fingerprint}.csv.gz")),
            failed_points: dir.join(format!("{fingerprint}_failed_points.csv")),
            lock: dir.join(format!("{fingerprint}.csv.downloading.lock")),
            csv,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> Config {
        let mut config = Config::default();
        config.api.api_key = Some("key".to_string());
        config.download.download_dir = PathBuf::from("/tmp/gsv");
        config
    }

    #[test]
    fn sanitize_strips_punctuation_and_lowercases() {
        assert_eq!(sanitize_query("New York City"), "new_york_city");
        assert_eq!(sanitize_query("Saint-Étienne, FR"), "sainttienne_fr");
        assert_eq!(sanitize_query("  Oslo "), "__oslo_");
    }

    #[test]
    fn fingerprint_matches_existing_file_names() {
        assert_eq!(
            fingerprint("Bonn", 1000.0, 1000.0, 20.0),
            "bonn_width_1000_height_1000_step_20.0"
        );
        assert_eq!(
            fingerprint("Bonn", 999.99, 10.5, 12.5),
            "bonn_width_999_height_10_step_12.5"
        );
    }

    #[test]
    fn paths_use_fingerprint() {
        let paths = JobPaths::new(Path::new("/data"), "bonn_width_100_height_100_step_50.0");

        assert_eq!(
            paths.downloading,
            PathBuf::from("/data/bonn_width_100_height_100_step_50.0.csv.downloading")
        );
        assert_eq!(
            paths.compressed,
            PathBuf::from("/data/bonn_width_100_height_100_step_50.0.csv.gz")
        );
        assert_eq!(
            paths.failed_points,
            PathBuf::from("/data/bonn_width_100_height_100_step_50.0_failed_points.csv")
        );
        assert_eq!(
            paths.lock,
            PathBuf::from("/data/bonn_width_100_height_100_step_50.0.csv.downloading.lock")
        );
    }

    #[test]
    fn new_takes_key_and_dir_from_config() {
        let job = Job::new(
            &config_with_key(),
            "Bonn",
            Coordinate::new(50.7374, 7.0982),
            100.0,
            100.0,
            50.0,
        )
        .unwrap();

        assert_eq!(job.api_key, "key");
        assert_eq!(job.output_dir, PathBuf::from("/tmp/gsv"));
    }

    #[test]
    fn new_without_api_key_is_a_config_error() {
        let err = Job::new(
            &Config::default(),
            "Bonn",
            Coordinate::new(50.7, 7.1),
            100.0,
            100.0,
            50.0,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Config { key: Some(k), .. } if k == "api.api_key"));
    }

    #[test]
    fn non_positive_step_is_rejected() {
        for step in [0.0, -5.0, f64::NAN] {
            let err = Job::new(
                &config_with_key(),
                "Bonn",
                Coordinate::new(50.7, 7.1),
                100.0,
                100.0,
                step,
            )
            .unwrap_err();
            assert!(matches!(err, Error::InvalidJob(_)), "step {step} accepted");
        }
    }

    #[test]
    fn unusable_query_is_rejected() {
        let err = Job::new(
            &config_with_key(),
            "東京",
            Coordinate::new(35.68, 139.69),
            100.0,
            100.0,
            50.0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidJob(_)));
    }
}
