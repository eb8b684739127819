// limitwatch/src/report.rs
//
// Result artifact + console summary.
//
// The artifact is the ranked EntityAggregate list as pretty JSON, written once
// per run: to a file when --output is given, otherwise to stdout.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::events::EntityAggregate;

/// Services listed per entity in the console summary.
const SUMMARY_SERVICES: usize = 3;

pub fn to_json(report: &[EntityAggregate]) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub async fn write(report: &[EntityAggregate], output: Option<&Path>) -> Result<()> {
    let json = to_json(report)? + "\n";
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            tokio::fs::write(path, json.as_bytes()).await
                .with_context(|| format!("writing report to {}", path.display()))?;
            info!("Report written to {} ({} entities)", path.display(), report.len());
        }
        None => {
            let mut out = tokio::io::stdout();
            out.write_all(json.as_bytes()).await?;
            out.flush().await?;
        }
    }
    Ok(())
}

/// One line per top entity: total, occurrence count, busiest services of its worst occurrence.
pub fn summary_lines(report: &[EntityAggregate], top: usize) -> Vec<String> {
    report.iter().take(top).enumerate().map(|(i, agg)| {
        let services = agg.occurrences.first()
            .map(|o| o.services.iter()
                .take(SUMMARY_SERVICES)
                .map(|s| format!("{}: {}", s.service, s.counts.widest()))
                .collect::<Vec<_>>()
                .join(", "))
            .unwrap_or_default();
        format!(
            "#{:<3} {:<24} {:<32} total={:<6} occurrences={:<4} [{}]",
            i + 1, agg.entity_id, agg.email, agg.total, agg.occurrences.len(), services
        )
    }).collect()
}

pub fn log_summary(report: &[EntityAggregate], top: usize) {
    if report.is_empty() {
        info!("No occurrences in the export window");
        return;
    }
    info!("Top {} of {} entities by preceding activity:", top.min(report.len()), report.len());
    for line in summary_lines(report, top) {
        info!("{}", line);
    }
}
