// limitwatch/src/engine/mod.rs
//
// End-to-end run:
//   violation export → correlate → aggregate (fan-out) → rank

pub mod aggregator;
pub mod ranking;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::correlate::{correlate, CooldownPolicy};
use crate::error::FetchError;
use crate::events::{EntityAggregate, TimeRange};
use crate::fetch::{Fetcher, LogSource};

use aggregator::Aggregator;

pub struct Pipeline<S> {
    fetcher:         Fetcher<S>,
    aggregator:      Aggregator<S>,
    violation_query: String,
    export_window:   Duration,
    cooldown:        Duration,
    policy:          CooldownPolicy,
}

impl<S: LogSource> Pipeline<S> {
    pub fn new(
        fetcher:         Fetcher<S>,
        aggregator:      Aggregator<S>,
        violation_query: impl Into<String>,
        export_window:   Duration,
        cooldown:        Duration,
        policy:          CooldownPolicy,
    ) -> Self {
        Self {
            fetcher,
            aggregator,
            violation_query: violation_query.into(),
            export_window,
            cooldown,
            policy,
        }
    }

    /// Process the export window ending at `now` and return the ranked report.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<Vec<EntityAggregate>, FetchError> {
        let range      = TimeRange::preceding(now, self.export_window);
        let violations = self.fetcher.fetch(&self.violation_query, range).await?;
        info!("Found {} rate limited requests. Handling occurrences...", violations.len());

        let occurrences = correlate(&violations, self.cooldown, self.policy);
        info!("Found {} total occurrences. Now checking all of them...", occurrences.len());

        let summaries = self.aggregator.aggregate_all(occurrences).await?;
        Ok(ranking::rank(summaries))
    }
}
