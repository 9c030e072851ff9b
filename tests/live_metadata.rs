#![cfg(feature = "live-tests")]

//! Live tests against the real metadata endpoint.
//!
//! Gated behind the `live-tests` feature flag. Requires `GMAPS_API_KEY` in the
//! environment or in `.env`. Metadata requests are free of charge but count
//! against the key's quota.
//!
//! ```bash
//! cargo test --features live-tests --test live_metadata -- --nocapture
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use pano_dl::{Config, Coordinate, Downloader, HttpMetadataProvider, Job, MetadataProvider};
use pano_dl::{GridPoint, PanoStatus};
use tempfile::TempDir;

fn live_config() -> Option<Config> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    if config.api.api_key.is_none() {
        eprintln!("Skipping: GMAPS_API_KEY not set");
        return None;
    }
    Some(config)
}

#[tokio::test]
async fn live_lookup_in_city_center_finds_a_pano() {
    let Some(config) = live_config() else {
        return;
    };
    let provider = HttpMetadataProvider::new(&config).unwrap();
    let point = GridPoint {
        latitude: 48.858_37,
        longitude: 2.294_481,
        row_index: 0,
        col_index: 0,
    };

    let record = provider
        .fetch(&point, config.api.api_key.as_deref().unwrap())
        .await
        .expect("live metadata request failed");

    println!("{record:?}");
    assert!(matches!(record.status, PanoStatus::Ok | PanoStatus::NoDate));
    assert!(record.pano_id.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_small_grid_download() {
    let Some(mut config) = live_config() else {
        return;
    };
    let dir = TempDir::new().unwrap();
    config.download.download_dir = dir.path().to_path_buf();
    config.download.batch_size = 10;
    config.download.connection_limit = 5;

    let job = Job::new(
        &config,
        "Bonn",
        Coordinate::new(50.7374, 7.0982),
        100.0,
        100.0,
        50.0,
    )
    .unwrap();
    let outcome = Downloader::new(config).unwrap().run(&job).await.unwrap();

    println!(
        "{} records, {} failed points in {:?}",
        outcome.records.len(),
        outcome.failed_points.len(),
        outcome.stats.elapsed
    );
    assert_eq!(outcome.records.len() + outcome.failed_points.len(), 9);
    assert!(outcome.artifact_path.exists());
}
