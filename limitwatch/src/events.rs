// limitwatch/src/events.rs
//
// Domain types flowing through limitwatch.
//
//   RawPage / RawRecord  — wire shape of one log-store response page
//   LogEvent             — normalized record (timestamp parsed, payload decoded once)
//   TimeRange            — half-open [from, to) query window
//   Occurrence           — one canonical violation per entity burst
//   OccurrenceSummary    — multi-horizon activity counts preceding an occurrence
//   EntityAggregate      — per-entity fold of summaries (the report row)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::window::{ServiceCounts, WindowCounts};

// ── Wire format ───────────────────────────────────────────────────────────────

/// One page of the log store's query response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub data:       Vec<RawRecord>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

impl RawPage {
    pub fn next_cursor(&self) -> Option<&str> {
        self.pagination.as_ref()?.next.as_deref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    pub dt: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "extensionVersion")]
    pub extension_version: Option<String>,
    /// JSON-encoded detail blob (creatorId, email, status, ...).
    #[serde(default)]
    pub json: Option<String>,
}

/// Fields we read out of the embedded detail blob.
#[derive(Debug, Clone, Default, Deserialize)]
struct Payload {
    #[serde(default, rename = "creatorId")]
    creator_id: Option<serde_json::Value>,
    #[serde(default)]
    email: Option<String>,
}

// ── Normalized event ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp:         DateTime<Utc>,
    pub message:           String,
    /// Bracketed service tag pulled from `message`; None when the message has none.
    pub service_tag:       Option<String>,
    pub extension_version: String,
    pub creator_id:        String,
    pub email:             String,
}

impl LogEvent {
    /// Normalize a wire record. Returns None only when `dt` is not a timestamp;
    /// a missing or malformed payload degrades to empty creator/email.
    pub fn from_raw(raw: RawRecord) -> Option<Self> {
        let timestamp = DateTime::parse_from_rfc3339(&raw.dt).ok()?.with_timezone(&Utc);

        let payload = match raw.json.as_deref() {
            Some(blob) => serde_json::from_str::<Payload>(blob).unwrap_or_else(|e| {
                tracing::warn!("Unparseable payload at {}: {}", raw.dt, e);
                Payload::default()
            }),
            None => Payload::default(),
        };

        // creatorId arrives as either a string or a number depending on the emitter
        let creator_id = match payload.creator_id {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        Some(Self {
            service_tag:       crate::window::extract_service_tag(&raw.message),
            timestamp,
            message:           raw.message,
            extension_version: raw.extension_version.unwrap_or_default(),
            creator_id,
            email:             payload.email.unwrap_or_default(),
        })
    }

    /// Aggregation key: service tag (or sentinel) joined with the extension version.
    pub fn service_key(&self) -> String {
        crate::window::service_key(self.service_tag.as_deref(), &self.extension_version)
    }
}

// ── Time range ────────────────────────────────────────────────────────────────

/// Half-open `[from, to)`. Construction clamps `to` so that `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to:   DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to: to.max(from) }
    }

    /// The `span` immediately preceding `anchor`: `[anchor - span, anchor)`.
    /// Saturates at the earliest representable instant.
    pub fn preceding(anchor: DateTime<Utc>, span: Duration) -> Self {
        Self::new(anchor.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC), anchor)
    }
}

// ── Correlation / aggregation output ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub entity_id:   String,
    pub anchor_time: DateTime<Utc>,
    pub email:       String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccurrenceSummary {
    pub occurrence:        Occurrence,
    pub total_per_horizon: WindowCounts,
    /// Per-service counters, ranked by the rank horizon (descending, stable).
    pub services:          Vec<ServiceCounts>,
}

impl OccurrenceSummary {
    /// Activity count at the widest horizon.
    pub fn total(&self) -> u64 {
        self.total_per_horizon.widest()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAggregate {
    pub entity_id:         String,
    pub email:             String,
    /// Sum of each owned occurrence's widest-horizon total.
    pub total:             u64,
    pub total_per_horizon: WindowCounts,
    pub occurrences:       Vec<OccurrenceSummary>,
}
