// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `kiln status` command implementation.
//!
//! Opens the pool database directly and prints a point-in-time snapshot,
//! human-readable by default or machine-readable with `--json`.

use kiln_config::model::KilnConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::types::{now_iso8601, FollowupStatus, PoolSummary};
use kiln_core::IdentityStore;
use kiln_storage::SqliteStore;

/// Runs the `kiln status` command.
pub async fn run(config: KilnConfig, json: bool) -> Result<()> {
    let store = SqliteStore::new(config.storage.clone());
    store.initialize().await?;
    store.ping().await?;

    let records = store.list_identities(None).await?;
    let summary = PoolSummary::from_records(&records);
    let pending = store.count_followups(FollowupStatus::Pending).await?;
    let processing = store.count_followups(FollowupStatus::Processing).await?;

    if json {
        let snapshot = serde_json::json!({
            "as_of": now_iso8601(),
            "database": config.storage.database_path,
            "summary": summary,
            "followups": { "pending": pending, "processing": processing },
        });
        let rendered = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| KilnError::Internal(format!("encode status snapshot: {e}")))?;
        println!("{rendered}");
    } else {
        print_snapshot(&summary, pending, processing, &config.storage.database_path);
    }
    Ok(())
}

fn print_snapshot(summary: &PoolSummary, pending: i64, processing: i64, database: &str) {
    println!("kiln pool status ({database})");
    println!(
        "  identities: {} total, {} assigned, {} available",
        summary.total, summary.assigned, summary.available
    );
    for (state, count) in &summary.by_state {
        println!("    {state:>8}: {count}");
    }
    println!(
        "  sent today: {} of {} ({:.0}% utilization)",
        summary.sent_today,
        summary.daily_capacity,
        summary.utilization * 100.0
    );
    println!("  average reputation: {:.3}", summary.average_reputation);
    println!("  follow-ups: {pending} pending, {processing} processing");
}

#[cfg(test)]
mod tests {
    use kiln_config::model::KilnConfig;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn status_runs_against_an_empty_pool() {
        let dir = tempdir().unwrap();
        let mut config = KilnConfig::default();
        config.storage.database_path = dir
            .path()
            .join("pool.db")
            .to_string_lossy()
            .into_owned();

        run(config.clone(), true).await.unwrap();
        run(config, false).await.unwrap();
    }
}
