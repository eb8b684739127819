// limitwatch/src/window.rs
//
// Nested trailing windows ("horizons") and per-service counters.
//
// Design:
//   - Horizons are an ordered list of durations, ascending, deduplicated.
//   - A window at horizon h is [anchor - h, anchor). Windows nest, so an event
//     inside the narrowest window increments every counter for its service.
//   - Service keys come from a best-effort bracketed-tag match on the message,
//     with a fixed sentinel when nothing matches. The sentinel is part of the
//     aggregation key and must stay stable.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::events::LogEvent;

/// Key prefix used when a message carries no bracketed service tag.
pub const NO_SERVICE: &str = "NO_SERVICE_SPECIFIED";

/// Default horizons in minutes.
pub const DEFAULT_HORIZONS_MIN: [i64; 5] = [1, 3, 5, 10, 15];

// ── Service-key extraction ────────────────────────────────────────────────────

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Greedy on purpose: "a: [x] [y] b" keys as "[x] [y]".
    RE.get_or_init(|| Regex::new(r":\s(\[.*\])\s").expect("static regex"))
}

/// First `": [tag] "` occurrence in a free-text message, brackets included.
pub fn extract_service_tag(message: &str) -> Option<String> {
    tag_regex()
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn service_key(tag: Option<&str>, extension_version: &str) -> String {
    format!("{}_{}", tag.unwrap_or(NO_SERVICE), extension_version)
}

// ── Horizons ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Horizons(Vec<Duration>);

impl Horizons {
    /// Sorts ascending and drops duplicates and non-positive spans.
    /// Returns None if nothing usable remains.
    pub fn new(spans: impl IntoIterator<Item = Duration>) -> Option<Self> {
        let mut v: Vec<Duration> = spans.into_iter().filter(|d| *d > Duration::zero()).collect();
        v.sort();
        v.dedup();
        if v.is_empty() { None } else { Some(Self(v)) }
    }

    /// Minutes outside chrono's range are dropped like non-positive ones.
    pub fn from_minutes(minutes: &[i64]) -> Option<Self> {
        Self::new(minutes.iter().filter(|m| **m > 0).filter_map(|m| Duration::try_minutes(*m)))
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn widest(&self) -> Duration {
        // Non-empty by construction
        self.0[self.0.len() - 1]
    }

    pub fn index_of(&self, span: Duration) -> Option<usize> {
        self.0.iter().position(|d| *d == span)
    }

    pub fn empty_counts(&self) -> WindowCounts {
        WindowCounts(vec![0; self.0.len()])
    }

    /// Increment every horizon whose window `[anchor - h, anchor)` contains `t`.
    pub fn record(&self, counts: &mut WindowCounts, anchor: DateTime<Utc>, t: DateTime<Utc>) {
        if t >= anchor { return; }
        let age = anchor - t;
        for (i, span) in self.0.iter().enumerate() {
            if age <= *span {
                counts.0[i] += 1;
            }
        }
    }
}

impl Default for Horizons {
    fn default() -> Self {
        Self(DEFAULT_HORIZONS_MIN.iter().map(|m| Duration::minutes(*m)).collect())
    }
}

// ── Counters ──────────────────────────────────────────────────────────────────

/// One counter per horizon, narrowest first. Non-decreasing left to right.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowCounts(pub Vec<u64>);

impl WindowCounts {
    pub fn get(&self, idx: usize) -> u64 {
        self.0.get(idx).copied().unwrap_or(0)
    }

    pub fn widest(&self) -> u64 {
        self.0.last().copied().unwrap_or(0)
    }

    /// Element-wise add; grows to the longer of the two.
    pub fn add(&mut self, other: &WindowCounts) {
        if self.0.len() < other.0.len() {
            self.0.resize(other.0.len(), 0);
        }
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a += *b;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCounts {
    pub service: String,
    pub counts:  WindowCounts,
}

// ── Per-occurrence tally ──────────────────────────────────────────────────────

/// Accumulates one occurrence's preceding activity, keeping services in
/// first-encounter order so ranking ties stay stable.
pub struct ServiceTally<'h> {
    horizons: &'h Horizons,
    anchor:   DateTime<Utc>,
    index:    HashMap<String, usize>,
    services: Vec<ServiceCounts>,
}

impl<'h> ServiceTally<'h> {
    pub fn new(horizons: &'h Horizons, anchor: DateTime<Utc>) -> Self {
        Self { horizons, anchor, index: HashMap::new(), services: Vec::new() }
    }

    pub fn record(&mut self, event: &LogEvent) {
        let key = event.service_key();
        let idx = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.services.push(ServiceCounts { service: key.clone(), counts: self.horizons.empty_counts() });
                self.index.insert(key, self.services.len() - 1);
                self.services.len() - 1
            }
        };
        self.horizons.record(&mut self.services[idx].counts, self.anchor, event.timestamp);
    }

    /// Totals per horizon plus services ranked by `rank_idx` descending.
    pub fn finish(self, rank_idx: usize) -> (WindowCounts, Vec<ServiceCounts>) {
        let mut totals = self.horizons.empty_counts();
        for s in &self.services {
            totals.add(&s.counts);
        }
        let mut ranked = self.services;
        ranked.sort_by(|a, b| b.counts.get(rank_idx).cmp(&a.counts.get(rank_idx)));
        (totals, ranked)
    }
}
