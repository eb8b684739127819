// limitwatch/src/engine/ranking.rs
//
// Folds occurrence summaries into per-entity aggregates and ranks them.
//
// Invariants:
//   - aggregate.total == Σ widest-horizon total of its occurrences
//   - aggregate.occurrences sorted by widest-horizon total, descending
//   - final list sorted by aggregate.total, descending
// All sorts are stable, so ties keep insertion order.

use std::collections::HashMap;

use crate::events::{EntityAggregate, OccurrenceSummary};

#[derive(Default)]
pub struct SummaryBuilder {
    index:    HashMap<String, usize>,
    entities: Vec<EntityAggregate>,
}

impl SummaryBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, summary: OccurrenceSummary) {
        let entity_id = summary.occurrence.entity_id.clone();
        let idx = match self.index.get(&entity_id) {
            Some(&i) => i,
            None => {
                self.entities.push(EntityAggregate {
                    entity_id:         entity_id.clone(),
                    email:             summary.occurrence.email.clone(),
                    total:             0,
                    total_per_horizon: Default::default(),
                    occurrences:       Vec::new(),
                });
                self.index.insert(entity_id, self.entities.len() - 1);
                self.entities.len() - 1
            }
        };

        let agg = &mut self.entities[idx];
        agg.total += summary.total();
        agg.total_per_horizon.add(&summary.total_per_horizon);
        agg.occurrences.push(summary);
        agg.occurrences.sort_by(|a, b| b.total().cmp(&a.total()));
    }

    /// Entities ranked by total, descending.
    pub fn finish(self) -> Vec<EntityAggregate> {
        let mut out = self.entities;
        out.sort_by(|a, b| b.total.cmp(&a.total));
        out
    }
}

pub fn rank(summaries: impl IntoIterator<Item = OccurrenceSummary>) -> Vec<EntityAggregate> {
    let mut builder = SummaryBuilder::new();
    for s in summaries {
        builder.add(s);
    }
    builder.finish()
}
