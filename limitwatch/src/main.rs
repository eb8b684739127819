// limitwatch/src/main.rs
//
// limitwatch — rate-limit violation correlation over a remote log store.
//
// One run:
//   1. export every rate-limited request from the last --export-hours
//   2. collapse violation bursts into one occurrence per entity (cooldown window)
//   3. for each occurrence, pull the entity's preceding activity and count it
//      per service across nested horizons (1/3/5/10/15 min by default)
//   4. rank entities by total preceding activity and write the report
//
// All remote calls share one rate-paced scheduler (--rate-per-minute).
//
// Usage:
//   TOKEN=... limitwatch
//   limitwatch --export-hours 6 --output out/report.json --cache-dir .cache
//   limitwatch --horizons 1,5,30 --rank-horizon 5 --cooldown-policy since-leader

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod correlate;
mod engine;
mod error;
mod events;
mod fetch;
mod report;
mod scheduler;
mod window;

use config::{Cli, Settings};
use engine::{aggregator::Aggregator, Pipeline};
use fetch::{Fetcher, HttpLogSource, ResponseCache};
use scheduler::RateScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("limitwatch=info".parse()?))
        .compact().init();

    match dotenv {
        Ok(path) => info!("Read dotenv file from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e).context("reading .env"),
    }

    let settings = Cli::parse().into_settings()?;
    let start    = Instant::now();

    if let Err(e) = run(settings).await {
        error!("Run aborted after {:.1}s: {:#}", start.elapsed().as_secs_f64(), e);
        return Err(e);
    }
    info!("Done in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

async fn run(settings: Settings) -> Result<()> {
    let scheduler = RateScheduler::new(settings.rate_per_minute)?;
    let source    = Arc::new(HttpLogSource::new(&settings.endpoint, &settings.source_ids, &settings.token)?);

    let mut fetcher = Fetcher::new(source, scheduler.clone(), settings.batch);
    if let Some(dir) = &settings.cache_dir {
        let cache = ResponseCache::new(dir)
            .with_context(|| format!("opening cache dir {}", dir.display()))?;
        fetcher = fetcher.with_cache(cache);
    }

    let aggregator = Aggregator::new(
        fetcher.clone(),
        settings.horizons.clone(),
        settings.rank_horizon,
        settings.activity_filter.clone(),
    )?;
    let pipeline = Pipeline::new(
        fetcher,
        aggregator,
        settings.violation_query.clone(),
        settings.export_window,
        settings.cooldown,
        settings.cooldown_policy,
    );

    info!(
        rate = settings.rate_per_minute,
        ceiling = scheduler.ceiling(),
        pace_ms = scheduler.pace().as_millis() as u64,
        horizons = settings.horizons.len(),
        policy = ?settings.cooldown_policy,
        "Starting export over the last {}h", settings.export_window.num_hours()
    );

    let report = pipeline.run(Utc::now()).await?;

    let stats = scheduler.stats();
    info!(completed = stats.completed, failed = stats.failed, "Remote queries finished");

    report::log_summary(&report, settings.top);
    report::write(&report, settings.output.as_deref()).await?;
    Ok(())
}
