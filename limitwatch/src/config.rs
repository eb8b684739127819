// limitwatch/src/config.rs
//
// CLI + environment configuration.
//
// A `.env` file is loaded before parsing (see main), so TOKEN and
// LOG_SOURCE_IDS can live there. `Cli::into_settings` validates everything
// up front; nothing downstream re-checks.

use std::path::PathBuf;

use chrono::Duration;
use clap::Parser;

use crate::correlate::{CooldownPolicy, DEFAULT_COOLDOWN_SECS};
use crate::engine::aggregator::DEFAULT_ACTIVITY_FILTER;
use crate::error::ConfigError;
use crate::fetch::DEFAULT_BATCH;
use crate::window::Horizons;

pub const DEFAULT_ENDPOINT: &str = "https://logs.betterstack.com/api/v1/query";
/// Upper bounds keep every window subtraction inside chrono's range.
pub const MAX_EXPORT_HOURS:    i64 = 24 * 366;
pub const MAX_HORIZON_MINUTES: i64 = 24 * 60;
pub const MAX_COOLDOWN_SECS:   i64 = 24 * 60 * 60;

pub const DEFAULT_VIOLATION_QUERY: &str =
    r#"message_json.status="429" AND (extensionVersion="2.3.13" OR extensionVersion="2.3.14")"#;

#[derive(Parser, Debug)]
#[command(
    name    = "limitwatch",
    about   = "Correlate rate-limit violations with the activity burst that preceded them",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    #[arg(long, env = "TOKEN", hide_env_values = true, help = "Bearer token for the log store")]
    pub token: Option<String>,

    #[arg(long, env = "LOG_SOURCE_IDS", default_value = "199226")]
    pub source_ids: String,

    #[arg(long, env = "LOG_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, default_value = "100", help = "Outbound queries per minute (also the concurrency ceiling)")]
    pub rate_per_minute: u32,

    #[arg(long, default_value_t = DEFAULT_BATCH, help = "Records requested per page")]
    pub batch: usize,

    #[arg(long, default_value = "24", allow_negative_numbers = true, help = "Violation export lookback in hours")]
    pub export_hours: i64,

    #[arg(long, default_value = DEFAULT_VIOLATION_QUERY)]
    pub violation_query: String,

    #[arg(long, default_value = DEFAULT_ACTIVITY_FILTER, help = "Appended to creatorid=\"<id>\" for activity lookups")]
    pub activity_filter: String,

    #[arg(long, value_delimiter = ',', default_value = "1,3,5,10,15", allow_negative_numbers = true, help = "Horizons in minutes")]
    pub horizons: Vec<i64>,

    #[arg(long, default_value = "10", allow_negative_numbers = true, help = "Horizon (minutes) used to rank services")]
    pub rank_horizon: i64,

    #[arg(long, default_value_t = DEFAULT_COOLDOWN_SECS, allow_negative_numbers = true)]
    pub cooldown_secs: i64,

    #[arg(long, value_enum, default_value_t = CooldownPolicy::AnyPrior)]
    pub cooldown_policy: CooldownPolicy,

    #[arg(long, help = "Report path (stdout when omitted)")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Directory for cached raw responses")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, default_value = "10", help = "Entities shown in the console summary")]
    pub top: usize,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub token:           String,
    pub source_ids:      String,
    pub endpoint:        String,
    pub rate_per_minute: u32,
    pub batch:           usize,
    pub export_window:   Duration,
    pub violation_query: String,
    pub activity_filter: String,
    pub horizons:        Horizons,
    pub rank_horizon:    Duration,
    pub cooldown:        Duration,
    pub cooldown_policy: CooldownPolicy,
    pub output:          Option<PathBuf>,
    pub cache_dir:       Option<PathBuf>,
    pub top:             usize,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let token = self.token.filter(|t| !t.trim().is_empty()).ok_or(ConfigError::MissingToken)?;
        if self.rate_per_minute == 0 { return Err(ConfigError::ZeroRate); }
        if self.batch == 0 { return Err(ConfigError::ZeroBatch); }
        if !(1..=MAX_COOLDOWN_SECS).contains(&self.cooldown_secs) {
            return Err(ConfigError::Cooldown);
        }
        if !(1..=MAX_EXPORT_HOURS).contains(&self.export_hours) {
            return Err(ConfigError::ExportWindow(self.export_hours));
        }
        if let Some(&m) = self.horizons.iter().find(|&&m| m > MAX_HORIZON_MINUTES) {
            return Err(ConfigError::Horizon(m));
        }

        let horizons = Horizons::from_minutes(&self.horizons).ok_or(ConfigError::NoHorizons)?;
        if self.rank_horizon <= 0 || !self.horizons.contains(&self.rank_horizon) {
            return Err(ConfigError::RankHorizon(self.rank_horizon));
        }
        let rank_horizon = Duration::minutes(self.rank_horizon);

        Ok(Settings {
            token,
            source_ids:      self.source_ids,
            endpoint:        self.endpoint,
            rate_per_minute: self.rate_per_minute,
            batch:           self.batch,
            export_window:   Duration::hours(self.export_hours),
            violation_query: self.violation_query,
            activity_filter: self.activity_filter,
            horizons,
            rank_horizon,
            cooldown:        Duration::seconds(self.cooldown_secs),
            cooldown_policy: self.cooldown_policy,
            output:          self.output,
            cache_dir:       self.cache_dir,
            top:             self.top,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Settings, ConfigError> {
        let mut args = vec!["limitwatch", "--token", "secret"];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).expect("cli parses").into_settings()
    }

    #[test]
    fn defaults_follow_the_reference_run() {
        let s = parse(&[]).unwrap();
        assert_eq!(s.rate_per_minute, 100);
        assert_eq!(s.batch, 1000);
        assert_eq!(s.export_window, Duration::hours(24));
        assert_eq!(s.horizons, Horizons::default());
        assert_eq!(s.rank_horizon, Duration::minutes(10));
        assert_eq!(s.cooldown, Duration::minutes(3));
        assert_eq!(s.cooldown_policy, CooldownPolicy::AnyPrior);
        assert_eq!(s.activity_filter, "\"OF request\"");
        assert!(s.output.is_none());
    }

    #[test]
    fn custom_horizons_and_policy() {
        let s = parse(&["--horizons", "2,30,5", "--rank-horizon", "30", "--cooldown-policy", "since-leader"]).unwrap();
        assert_eq!(s.horizons, Horizons::from_minutes(&[2, 5, 30]).unwrap());
        assert_eq!(s.cooldown_policy, CooldownPolicy::SinceLeader);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(matches!(parse(&["--rate-per-minute", "0"]), Err(ConfigError::ZeroRate)));
        assert!(matches!(parse(&["--batch", "0"]), Err(ConfigError::ZeroBatch)));
        assert!(matches!(parse(&["--rank-horizon", "7"]), Err(ConfigError::RankHorizon(7))));
        assert!(matches!(parse(&["--horizons", "0"]), Err(ConfigError::NoHorizons)));
        assert!(matches!(parse(&["--cooldown-secs", "0"]), Err(ConfigError::Cooldown)));
        assert!(matches!(parse(&["--rank-horizon", "-10"]), Err(ConfigError::RankHorizon(-10))));
        assert!(matches!(
            Cli::try_parse_from(["limitwatch", "--token", "  "]).unwrap().into_settings(),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn out_of_range_windows_are_rejected_before_use() {
        assert!(matches!(parse(&["--export-hours", "3000000000"]), Err(ConfigError::ExportWindow(3_000_000_000))));
        assert!(matches!(parse(&["--export-hours", "-1"]), Err(ConfigError::ExportWindow(-1))));
        assert!(matches!(parse(&["--export-hours", "0"]), Err(ConfigError::ExportWindow(0))));
        assert!(matches!(parse(&["--horizons", "1,9999999999999"]), Err(ConfigError::Horizon(9_999_999_999_999))));
        assert!(matches!(parse(&["--horizons", "-9223372036854775807"]), Err(ConfigError::NoHorizons)));
        assert!(matches!(parse(&["--cooldown-secs", "-5"]), Err(ConfigError::Cooldown)));
        assert!(matches!(parse(&["--cooldown-secs", "9223372036854775807"]), Err(ConfigError::Cooldown)));
        assert!(matches!(
            parse(&["--rank-horizon", "9223372036854775807"]),
            Err(ConfigError::RankHorizon(i64::MAX))
        ));

        let widest = parse(&[
            "--export-hours",  &MAX_EXPORT_HOURS.to_string(),
            "--horizons",      &MAX_HORIZON_MINUTES.to_string(),
            "--rank-horizon",  &MAX_HORIZON_MINUTES.to_string(),
            "--cooldown-secs", &MAX_COOLDOWN_SECS.to_string(),
        ])
        .unwrap();
        assert_eq!(widest.export_window, Duration::hours(MAX_EXPORT_HOURS));
        assert_eq!(widest.horizons.widest(), Duration::minutes(MAX_HORIZON_MINUTES));
    }
}
