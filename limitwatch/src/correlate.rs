// limitwatch/src/correlate.rs
//
// Occurrence correlator: collapse bursts of rate-limit violations into one
// canonical occurrence per entity.
//
// A violation at t is suppressed when a same-entity reference instant r
// satisfies  t - cooldown <= r < t.  What counts as a reference depends on
// the policy:
//   AnyPrior    — every earlier violation, suppressed or not
//   SinceLeader — only the entity's last emitted occurrence
// Equal timestamps never suppress each other (the bound is strict).
// Input order does not matter; output is chronological, stable on ties.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::events::{LogEvent, Occurrence};

pub const DEFAULT_COOLDOWN_SECS: i64 = 180;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CooldownPolicy {
    #[default]
    AnyPrior,
    SinceLeader,
}

pub fn correlate(violations: &[LogEvent], cooldown: Duration, policy: CooldownPolicy) -> Vec<Occurrence> {
    let mut ordered: Vec<&LogEvent> = violations.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);

    // Per-entity reference instant: last distinct earlier violation (AnyPrior)
    // or last emitted occurrence (SinceLeader).
    let mut reference: HashMap<&str, DateTime<Utc>> = HashMap::new();
    // AnyPrior needs the previous *distinct* instant, so equal timestamps
    // in a row all compare against what came before them.
    let mut last_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();
    let mut out = Vec::new();

    for ev in ordered {
        let entity = ev.creator_id.as_str();

        if policy == CooldownPolicy::AnyPrior {
            if let Some(&seen) = last_seen.get(entity) {
                if seen < ev.timestamp {
                    reference.insert(entity, seen);
                }
            }
            last_seen.insert(entity, ev.timestamp);
        }

        let floor = ev.timestamp.checked_sub_signed(cooldown).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let suppressed = reference
            .get(entity)
            .map(|r| *r >= floor && *r < ev.timestamp)
            .unwrap_or(false);
        if suppressed { continue; }

        if policy == CooldownPolicy::SinceLeader {
            reference.insert(entity, ev.timestamp);
        }
        out.push(Occurrence {
            entity_id:   ev.creator_id.clone(),
            anchor_time: ev.timestamp,
            email:       ev.email.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn v(entity: &str, secs: i64) -> LogEvent {
        LogEvent {
            timestamp:         base() + Duration::seconds(secs),
            message:           "429".into(),
            service_tag:       None,
            extension_version: "2.3.14".into(),
            creator_id:        entity.into(),
            email:             format!("{}@example.com", entity),
        }
    }

    fn summary(occ: &[Occurrence]) -> Vec<(String, i64)> {
        occ.iter()
            .map(|o| (o.entity_id.clone(), (o.anchor_time - base()).num_seconds()))
            .collect()
    }

    fn cd() -> Duration { Duration::seconds(DEFAULT_COOLDOWN_SECS) }

    #[test]
    fn leader_policy_keeps_burst_heads() {
        // unordered input on purpose
        let input = vec![v("X", 200), v("Y", 30), v("X", 60), v("X", 0)];
        let out   = correlate(&input, cd(), CooldownPolicy::SinceLeader);
        assert_eq!(summary(&out), vec![("X".into(), 0), ("Y".into(), 30), ("X".into(), 200)]);
        assert_eq!(out[0].email, "X@example.com");
    }

    #[test]
    fn any_prior_policy_chains_through_suppressed_violations() {
        // X@200 sits 140s after the suppressed X@60
        let input = vec![v("X", 200), v("Y", 30), v("X", 60), v("X", 0)];
        let out   = correlate(&input, cd(), CooldownPolicy::AnyPrior);
        assert_eq!(summary(&out), vec![("X".into(), 0), ("Y".into(), 30)]);
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        for policy in [CooldownPolicy::AnyPrior, CooldownPolicy::SinceLeader] {
            let at_edge = correlate(&[v("X", 0), v("X", 180)], cd(), policy);
            assert_eq!(at_edge.len(), 1, "{:?}", policy);
            let past_edge = correlate(&[v("X", 0), v("X", 181)], cd(), policy);
            assert_eq!(past_edge.len(), 2, "{:?}", policy);
        }
    }

    #[test]
    fn simultaneous_violations_do_not_suppress_each_other() {
        for policy in [CooldownPolicy::AnyPrior, CooldownPolicy::SinceLeader] {
            let out = correlate(&[v("X", 10), v("X", 10), v("X", 20)], cd(), policy);
            assert_eq!(summary(&out), vec![("X".into(), 10), ("X".into(), 10)], "{:?}", policy);
        }
    }

    #[test]
    fn emitted_occurrences_are_spaced_by_cooldown() {
        let secs  = [0, 45, 170, 179, 400, 410, 581, 600, 790, 1000, 1170, 1181];
        let input: Vec<LogEvent> = secs.iter().flat_map(|s| [v("A", *s), v("B", s + 7)]).collect();

        for policy in [CooldownPolicy::AnyPrior, CooldownPolicy::SinceLeader] {
            let out = correlate(&input, cd(), policy);
            for entity in ["A", "B"] {
                let times: Vec<_> = out.iter().filter(|o| o.entity_id == entity).map(|o| o.anchor_time).collect();
                assert!(!times.is_empty());
                for w in times.windows(2) {
                    assert!(w[1] - w[0] >= cd(), "{:?} {} {:?}", policy, entity, w);
                }
            }
            assert!(out.windows(2).all(|w| w[0].anchor_time <= w[1].anchor_time));
        }
    }

    #[test]
    fn violations_at_the_start_of_time_do_not_overflow() {
        let early = |entity: &str, secs: i64| LogEvent {
            timestamp: DateTime::<Utc>::MIN_UTC + Duration::seconds(secs),
            ..v(entity, 0)
        };
        for policy in [CooldownPolicy::AnyPrior, CooldownPolicy::SinceLeader] {
            let out = correlate(&[early("X", 0), early("X", 60), early("X", 400)], cd(), policy);
            assert_eq!(out.len(), 2, "{:?}", policy);
        }
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(correlate(&[], cd(), CooldownPolicy::AnyPrior).is_empty());
    }
}
