// limitwatch/src/engine/aggregator.rs
//
// Multi-window aggregator — reconstructs the activity burst that preceded
// each occurrence.
//
// Per occurrence:
//   1. fetch `creatorid="<entity>" <activity filter>` over [anchor - widest, anchor)
//   2. key each event by service tag + extension version (sentinel on no tag)
//   3. bump that service's counter at every horizon whose window holds the event
//   4. totals per horizon = sum over services; services ranked at the rank horizon
//
// Fan-out: one task per occurrence, all sharing the fetcher's scheduler, so the
// outbound rate stays bounded regardless of how many occurrences there are.
// The first failure aborts the remaining tasks and is returned.

use std::sync::Arc;

use chrono::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{ConfigError, FetchError, SchedulerError};
use crate::events::{Occurrence, OccurrenceSummary, TimeRange};
use crate::fetch::{Fetcher, LogSource};
use crate::window::{Horizons, ServiceTally};

pub const DEFAULT_ACTIVITY_FILTER: &str = "\"OF request\"";

pub struct Aggregator<S> {
    fetcher:         Fetcher<S>,
    horizons:        Arc<Horizons>,
    rank_idx:        usize,
    activity_filter: Arc<str>,
}

impl<S> Clone for Aggregator<S> {
    fn clone(&self) -> Self {
        Self {
            fetcher:         self.fetcher.clone(),
            horizons:        Arc::clone(&self.horizons),
            rank_idx:        self.rank_idx,
            activity_filter: Arc::clone(&self.activity_filter),
        }
    }
}

impl<S: LogSource> Aggregator<S> {
    pub fn new(
        fetcher:         Fetcher<S>,
        horizons:        Horizons,
        rank_horizon:    Duration,
        activity_filter: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let rank_idx = horizons
            .index_of(rank_horizon)
            .ok_or(ConfigError::RankHorizon(rank_horizon.num_minutes()))?;
        Ok(Self {
            fetcher,
            horizons: Arc::new(horizons),
            rank_idx,
            activity_filter: Arc::from(activity_filter.into()),
        })
    }

    pub fn activity_query(&self, entity_id: &str) -> String {
        format!("creatorid=\"{}\" {}", entity_id, self.activity_filter)
    }

    pub async fn aggregate(&self, occurrence: &Occurrence) -> Result<OccurrenceSummary, FetchError> {
        let range  = TimeRange::preceding(occurrence.anchor_time, self.horizons.widest());
        let events = self.fetcher.fetch(&self.activity_query(&occurrence.entity_id), range).await?;

        let mut tally = ServiceTally::new(&self.horizons, occurrence.anchor_time);
        for ev in &events {
            tally.record(ev);
        }
        let (total_per_horizon, services) = tally.finish(self.rank_idx);

        debug!(
            entity = %occurrence.entity_id,
            anchor = %occurrence.anchor_time,
            events = events.len(),
            services = services.len(),
            "occurrence aggregated"
        );
        Ok(OccurrenceSummary { occurrence: occurrence.clone(), total_per_horizon, services })
    }

    /// Aggregate every occurrence concurrently. Output order matches input order.
    pub async fn aggregate_all(&self, occurrences: Vec<Occurrence>) -> Result<Vec<OccurrenceSummary>, FetchError> {
        let total = occurrences.len();
        let mut set = JoinSet::new();
        for (idx, occ) in occurrences.into_iter().enumerate() {
            let agg = self.clone();
            set.spawn(async move { agg.aggregate(&occ).await.map(|s| (idx, s)) });
        }

        let mut slots: Vec<Option<OccurrenceSummary>> = (0..total).map(|_| None).collect();
        let mut handled = 0usize;
        while let Some(joined) = set.join_next().await {
            let (idx, summary) = match joined {
                Ok(Ok(done)) => done,
                Ok(Err(e)) => {
                    error!("Occurrence aggregation failed, aborting {} pending: {}", set.len(), e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Occurrence task died: {}", e);
                    return Err(SchedulerError::TaskLost.into());
                }
            };
            slots[idx] = Some(summary);
            handled += 1;
            info!("Handled {}/{} occurrences", handled, total);
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
