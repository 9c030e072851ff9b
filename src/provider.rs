//! Street-level imagery metadata lookups
//!
//! [`MetadataProvider`] is the seam between the download engine and the remote
//! API. [`HttpMetadataProvider`] talks to the metadata endpoint over HTTP; tests
//! and custom transports supply their own implementation.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{DownloadRecord, GridPoint, PanoStatus};
use serde::Deserialize;
use std::time::Duration;

/// Longest body excerpt kept in a [`Error::RemoteApi`] message
const ERROR_BODY_LIMIT: usize = 200;

/// Source of metadata for one grid point
///
/// One call is one lookup attempt. Retrying transient failures is the
/// caller's job, so implementations should return errors rather than loop.
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Look up the pano nearest to `point`.
    async fn fetch(&self, point: &GridPoint, api_key: &str) -> Result<DownloadRecord>;
}

/// Metadata endpoint answer
#[derive(Clone, Debug, Deserialize)]
pub struct MetadataResponse {
    /// API status string (`OK`, `ZERO_RESULTS`, ...)
    pub status: String,
    /// Pano position
    #[serde(default)]
    pub location: Option<ResponseLocation>,
    /// Pano identifier
    #[serde(default)]
    pub pano_id: Option<String>,
    /// Capture date, `YYYY-MM`
    #[serde(default)]
    pub date: Option<String>,
    /// Copyright line
    #[serde(default)]
    pub copyright: Option<String>,
}

/// `location` object of a [`MetadataResponse`]
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ResponseLocation {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub lng: f64,
}

/// Turn an API answer into the output row for `point`.
///
/// `OK` without a capture date becomes [`PanoStatus::NoDate`] with the pano
/// fields kept. Every other non-`OK` status leaves the pano fields empty.
/// Unrecognized status strings are stored as [`PanoStatus::UnknownError`].
pub fn to_record(point: &GridPoint, response: MetadataResponse, query_timestamp: String) -> DownloadRecord {
    let status = PanoStatus::from_api(&response.status).unwrap_or_else(|| {
        tracing::warn!(
            status = %response.status,
            lat = point.latitude,
            lon = point.longitude,
            "Unrecognized metadata status"
        );
        PanoStatus::UnknownError
    });

    let mut record = DownloadRecord {
        query_lat: point.latitude,
        query_lon: point.longitude,
        query_timestamp,
        pano_lat: None,
        pano_lon: None,
        pano_id: None,
        capture_date: None,
        copyright_info: None,
        status,
    };

    if status == PanoStatus::Ok {
        record.pano_lat = response.location.map(|l| l.lat);
        record.pano_lon = response.location.map(|l| l.lng);
        record.pano_id = response.pano_id;
        record.copyright_info = response.copyright;
        record.capture_date = response.date.filter(|d| !d.is_empty());
        if record.capture_date.is_none() {
            record.status = PanoStatus::NoDate;
        }
    }

    record
}

/// [`MetadataProvider`] backed by the HTTP metadata endpoint
#[derive(Clone, Debug)]
pub struct HttpMetadataProvider {
    client: reqwest::Client,
    endpoint: String,
    source: String,
}

impl HttpMetadataProvider {
    /// Build a provider from the API and download settings.
    ///
    /// The HTTP client enforces the request timeout and keeps at most
    /// `connection_limit` idle connections.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_timeout(
            &config.api.endpoint,
            &config.api.source,
            config.download.request_timeout,
            config.download.connection_limit,
        )
    }

    fn with_timeout(
        endpoint: &str,
        source: &str,
        timeout: Duration,
        connection_limit: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(connection_limit)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            source: source.to_string(),
        })
    }

    /// The metadata endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl MetadataProvider for HttpMetadataProvider {
    async fn fetch(&self, point: &GridPoint, api_key: &str) -> Result<DownloadRecord> {
        let location = format!("{},{}", point.latitude, point.longitude);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("location", location.as_str()),
                ("key", api_key),
                ("source", self.source.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::RemoteApi {
                status: Some(status.as_u16()),
                message: excerpt(&body),
            });
        }

        let parsed: MetadataResponse = serde_json::from_str(&body).map_err(|e| Error::RemoteApi {
            status: None,
            message: format!("malformed metadata response: {e}"),
        })?;

        Ok(to_record(point, parsed, chrono::Local::now().to_rfc3339()))
    }
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}
