// limitwatch/src/error.rs
//
// Typed errors for the scheduler, the fetch path and configuration.
// The binary wraps these in anyhow at the edges.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The dispatcher task is gone; nothing will ever run this task.
    #[error("scheduler has shut down")]
    Closed,
    /// The task was dropped (or panicked) before producing a result.
    #[error("scheduled task was dropped before completing")]
    TaskLost,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("log store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response body: {0}")]
    Body(#[from] serde_json::Error),
    #[error("response cache I/O failed: {0}")]
    Cache(#[from] std::io::Error),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rate per minute must be at least 1")]
    ZeroRate,
    #[error("batch size must be at least 1")]
    ZeroBatch,
    #[error("no positive horizon given")]
    NoHorizons,
    #[error("horizon {0}m is longer than the {}m limit", crate::config::MAX_HORIZON_MINUTES)]
    Horizon(i64),
    #[error("rank horizon {0}m is not one of the configured horizons")]
    RankHorizon(i64),
    #[error("cooldown must be between 1 and {} seconds", crate::config::MAX_COOLDOWN_SECS)]
    Cooldown,
    #[error("export window {0}h must be between 1 and {} hours", crate::config::MAX_EXPORT_HOURS)]
    ExportWindow(i64),
    #[error("missing bearer token (set TOKEN or pass --token)")]
    MissingToken,
}
