//! End-to-end grid downloads against a mock metadata endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use pano_dl::artifact::read_artifact;
use pano_dl::config::RetryConfig;
use pano_dl::{Config, Coordinate, Downloader, Error, Job, OutcomeSource, PanoStatus};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.api.endpoint = format!("{}/metadata", server.uri());
    config.api.api_key = Some("integration-key".to_string());
    config.download.download_dir = dir.path().to_path_buf();
    config.download.batch_size = 4;
    config.download.connection_limit = 2;
    config.download.request_timeout = Duration::from_secs(5);
    config.download.max_retries = 1;
    config.download.retry_pass_delay = Duration::ZERO;
    config.retry = RetryConfig {
        max_attempts: 0,
        jitter: false,
        ..RetryConfig::default()
    };
    config
}

fn null_island(config: &Config) -> Job {
    Job::new(config, "Null Island", Coordinate::new(0.0, 0.0), 100.0, 100.0, 50.0).unwrap()
}

#[tokio::test]
async fn downloads_grid_into_compressed_artifact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .and(query_param("key", "integration-key"))
        .and(query_param("source", "outdoor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "location": {"lat": 0.0001, "lng": 0.0001},
            "pano_id": "pano-1",
            "date": "2022-04",
            "copyright": "© Google"
        })))
        .expect(9)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let config = config_for(&server, &dir);
    let job = null_island(&config);

    let outcome = Downloader::new(config).unwrap().run(&job).await.unwrap();

    assert_eq!(outcome.source, OutcomeSource::Downloaded);
    assert_eq!(outcome.fingerprint, "null_island_width_100_height_100_step_50.0");
    assert_eq!(outcome.records.len(), 9);

    let on_disk = read_artifact(&outcome.artifact_path).unwrap();
    assert_eq!(on_disk, *outcome.records);
    assert!(on_disk.iter().all(|r| r.status == PanoStatus::Ok));
    assert!(on_disk.iter().all(|r| r.capture_date.as_deref() == Some("2022-04")));
    assert!(!job.paths().downloading.exists());
}

#[tokio::test]
async fn ok_without_date_is_stored_as_no_date() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "location": {"lat": 0.0002, "lng": -0.0002},
            "pano_id": "undated"
        })))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let config = config_for(&server, &dir);

    let outcome = Downloader::new(config.clone())
        .unwrap()
        .run(&null_island(&config))
        .await
        .unwrap();

    for r in outcome.records.iter() {
        assert_eq!(r.status, PanoStatus::NoDate);
        assert_eq!(r.pano_id.as_deref(), Some("undated"));
        assert!(r.capture_date.is_none());
    }
}

#[tokio::test]
async fn failing_point_is_reported_and_rest_of_grid_completes() {
    let server = MockServer::start().await;
    // Mounted first so it wins for the grid center
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .and(query_param("location", "0,0"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ZERO_RESULTS"})))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let config = config_for(&server, &dir);
    let job = null_island(&config);

    let outcome = Downloader::new(config).unwrap().run(&job).await.unwrap();

    assert_eq!(outcome.records.len(), 8);
    assert!(outcome.records.iter().all(|r| r.status == PanoStatus::ZeroResults));
    assert_eq!(outcome.failed_points.len(), 1);
    assert_eq!(outcome.stats.retry_passes, 1);

    let failed = std::fs::read_to_string(job.paths().failed_points).unwrap();
    assert_eq!(failed.lines().count(), 2);
}

#[tokio::test]
async fn rerun_with_new_engine_loads_existing_artifact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ZERO_RESULTS"})))
        .expect(9)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let config = config_for(&server, &dir);
    let job = null_island(&config);

    let first = Downloader::new(config.clone()).unwrap().run(&job).await.unwrap();
    let second = Downloader::new(config).unwrap().run(&job).await.unwrap();

    assert_eq!(second.source, OutcomeSource::Artifact);
    assert_eq!(*second.records, *first.records);
}

#[test]
fn connection_limit_above_batch_size_is_rejected() {
    let mut config = Config::default();
    config.download.connection_limit = 10;
    config.download.batch_size = 5;

    let err = Downloader::new(config).unwrap_err();

    assert!(matches!(err, Error::Config { .. }));
    assert!(err.to_string().contains("batch_size"));
}
