//! Grid download example
//!
//! This example demonstrates the core functionality of pano-dl:
//! - Loading configuration from the environment
//! - Creating a downloader instance
//! - Subscribing to progress events
//! - Running a job with graceful Ctrl+C handling
//!
//! Usage:
//!
//! ```text
//! GMAPS_API_KEY=... cargo run --example grid_download -- "Paris, France" 48.8566 2.3522 [width] [height] [step]
//! ```
//!
//! Interrupt with Ctrl+C and run the same command again to resume.

use pano_dl::{Config, Coordinate, Downloader, Event, Job, run_until_signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pano_dl=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        eprintln!("usage: grid_download <query> <lat> <lon> [width_m] [height_m] [step_m]");
        std::process::exit(2);
    }
    let query = &args[0];
    let lat: f64 = args[1].parse()?;
    let lon: f64 = args[2].parse()?;
    let width: f64 = args.get(3).map(|s| s.parse()).transpose()?.unwrap_or(1000.0);
    let height: f64 = args.get(4).map(|s| s.parse()).transpose()?.unwrap_or(1000.0);
    let step: f64 = args.get(5).map(|s| s.parse()).transpose()?.unwrap_or(20.0);

    // GMAPS_API_KEY and GSV_DOWNLOAD_PATH
    let config = Config::from_env();
    let job = Job::new(&config, query, Coordinate::new(lat, lon), width, height, step)?;
    let downloader = Downloader::new(config)?;

    let mut events = downloader.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::JobStarted {
                    fingerprint,
                    total_points,
                    already_done,
                } => {
                    println!("▶ {fingerprint}: {already_done}/{total_points} points already done");
                }
                Event::BatchPersisted {
                    pass,
                    completed,
                    total_points,
                    failed,
                    ..
                } => {
                    let percent = completed as f64 / total_points.max(1) as f64 * 100.0;
                    println!("  pass {pass}: {completed}/{total_points} ({percent:.1}%), {failed} to retry");
                }
                Event::RetryPassStarted { pass, points } => {
                    println!("↻ retry pass {pass} for {points} points");
                }
                Event::PointsFailed { count, path, .. } => {
                    println!("✗ {count} points failed, see {}", path.display());
                }
                Event::CacheHit { source, .. } => {
                    println!("✓ already downloaded ({source:?})");
                }
                Event::JobComplete { records, path, .. } => {
                    println!("✓ {records} records written to {}", path.display());
                }
            }
        }
    });

    let outcome = run_until_signal(&downloader, &job).await?;
    println!(
        "Done: {} records, {} failed points, {:.1?}",
        outcome.records.len(),
        outcome.failed_points.len(),
        outcome.stats.elapsed
    );

    Ok(())
}
