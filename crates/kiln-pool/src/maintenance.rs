// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cron-driven maintenance scheduler.
//!
//! One task owns every recurring chore: the hourly health sweep, the
//! midnight counter reset, warmup advancement, tier expiry, and follow-up
//! retention. Cadences are six-field cron expressions (seconds first)
//! evaluated in UTC. Each job's last run is stamped in the store, so a
//! restart resumes the schedule: a slot missed while the process was down
//! runs once at the first tick, and a slot that already ran waits for its
//! next occurrence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use croner::parser::{CronParser, Seconds};
use croner::Cron;
use kiln_config::model::{MaintenanceConfig, PoolConfig};
use kiln_core::error::{KilnError, Result};
use kiln_core::types::iso8601;
use kiln_core::IdentityStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::health::HealthChecker;
use crate::tiers::TierManager;
use crate::warmup::WarmupRunner;

/// One recurring chore. `run` returns a short human summary for the log.
#[async_trait]
pub trait MaintenanceJob: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, now: DateTime<Utc>) -> Result<String>;
}

struct JobSlot {
    job: Box<dyn MaintenanceJob>,
    schedule: Cron,
    next_due: Option<DateTime<Utc>>,
}

/// Ticks the wall clock and runs whichever jobs have come due.
pub struct MaintenanceRunner {
    tick_interval: Duration,
    store: Arc<dyn IdentityStore>,
    slots: Vec<JobSlot>,
}

impl std::fmt::Debug for MaintenanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceRunner")
            .field("tick_interval", &self.tick_interval)
            .field("jobs", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl MaintenanceRunner {
    /// Wire up the standard job set from configuration.
    pub fn new(
        maintenance: &MaintenanceConfig,
        pool: &PoolConfig,
        store: Arc<dyn IdentityStore>,
        health: Arc<HealthChecker>,
        warmups: Arc<WarmupRunner>,
        tiers: Arc<TierManager>,
    ) -> Result<Self> {
        let mut runner = Self {
            tick_interval: Duration::from_secs(maintenance.tick_secs.max(1)),
            store: store.clone(),
            slots: Vec::new(),
        };
        runner.add_job(
            Box::new(HealthSweepJob { health }),
            &maintenance.health_sweep_cron,
        )?;
        runner.add_job(
            Box::new(DailyResetJob {
                store: store.clone(),
            }),
            &maintenance.daily_reset_cron,
        )?;
        runner.add_job(
            Box::new(WarmupAdvanceJob { warmups }),
            &maintenance.warmup_cron,
        )?;
        runner.add_job(Box::new(TierSweepJob { tiers }), &maintenance.tier_sweep_cron)?;
        runner.add_job(
            Box::new(RetentionJob {
                store,
                retention_days: pool.followup_retention_days,
            }),
            &maintenance.retention_cron,
        )?;
        Ok(runner)
    }

    /// Register a job on the given cadence. Jobs run in registration order
    /// within a tick.
    pub fn add_job(&mut self, job: Box<dyn MaintenanceJob>, cadence: &str) -> Result<()> {
        let schedule = parse_cadence(job.name(), cadence)?;
        self.slots.push(JobSlot {
            job,
            schedule,
            next_due: None,
        });
        Ok(())
    }

    /// Run until the shutdown token fires.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.seed().await?;
        info!(
            jobs = self.slots.len(),
            tick_secs = self.tick_interval.as_secs(),
            "maintenance scheduler started"
        );
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("maintenance scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }
    }

    /// Compute each slot's first due time from its persisted last run, or
    /// from now for a job that has never run.
    async fn seed(&mut self) -> Result<()> {
        let store = self.store.clone();
        for slot in &mut self.slots {
            let name = slot.job.name();
            let anchor = match store.job_last_run(name).await? {
                Some(stamp) => match DateTime::parse_from_rfc3339(&stamp) {
                    Ok(at) => at.with_timezone(&Utc),
                    Err(e) => {
                        warn!(job = name, stamp, error = %e, "unreadable last-run stamp, scheduling from now");
                        Utc::now()
                    }
                },
                None => Utc::now(),
            };
            slot.next_due = next_occurrence(&slot.schedule, name, anchor);
        }
        Ok(())
    }

    /// Run every job due at `now` and reschedule it. Returns the names of
    /// the jobs that ran, in order.
    async fn tick(&mut self, now: DateTime<Utc>) -> Vec<&'static str> {
        let store = self.store.clone();
        let mut ran = Vec::new();
        for slot in &mut self.slots {
            let Some(due) = slot.next_due else { continue };
            if due > now {
                continue;
            }
            let name = slot.job.name();
            let started = Instant::now();
            let result = slot.job.run(now).await;
            kiln_metrics::record_job_duration(name, started.elapsed().as_secs_f64());
            match result {
                Ok(summary) => {
                    info!(job = name, %summary, "maintenance job finished");
                    if let Err(e) = store.stamp_job_run(name, &iso8601(now)).await {
                        warn!(job = name, error = %e, "failed to stamp job run");
                    }
                }
                // A failed run is retried at the next cadence, not every
                // tick.
                Err(e) => warn!(job = name, error = %e, "maintenance job failed"),
            }
            ran.push(name);
            slot.next_due = next_occurrence(&slot.schedule, name, now);
        }
        ran
    }
}

fn parse_cadence(job: &str, pattern: &str) -> Result<Cron> {
    CronParser::builder()
        .seconds(Seconds::Required)
        .build()
        .parse(pattern)
        .map_err(|e| KilnError::Config(format!("{job} cadence `{pattern}`: {e}")))
}

fn next_occurrence(
    schedule: &Cron,
    job: &'static str,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match schedule.find_next_occurrence(&after, false) {
        Ok(due) => Some(due),
        Err(e) => {
            warn!(job, error = %e, "no next occurrence, job disabled");
            None
        }
    }
}

struct HealthSweepJob {
    health: Arc<HealthChecker>,
}

#[async_trait]
impl MaintenanceJob for HealthSweepJob {
    fn name(&self) -> &'static str {
        "health_sweep"
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<String> {
        let sweep = self.health.run_sweep().await?;
        Ok(format!("checked {}, rotated {}", sweep.checked, sweep.rotated))
    }
}

struct DailyResetJob {
    store: Arc<dyn IdentityStore>,
}

#[async_trait]
impl MaintenanceJob for DailyResetJob {
    fn name(&self) -> &'static str {
        "daily_reset"
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<String> {
        let touched = self.store.reset_daily_counters().await?;
        Ok(format!("zeroed sent_today on {touched} identities"))
    }
}

struct WarmupAdvanceJob {
    warmups: Arc<WarmupRunner>,
}

#[async_trait]
impl MaintenanceJob for WarmupAdvanceJob {
    fn name(&self) -> &'static str {
        "warmup_advance"
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<String> {
        let today = now.format("%Y-%m-%d").to_string();
        let sweep = self.warmups.run_daily(&today).await?;
        Ok(format!(
            "advanced {}, completed {}, skipped {}",
            sweep.advanced, sweep.completed, sweep.skipped
        ))
    }
}

struct TierSweepJob {
    tiers: Arc<TierManager>,
}

#[async_trait]
impl MaintenanceJob for TierSweepJob {
    fn name(&self) -> &'static str {
        "tier_expiry"
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<String> {
        let downgraded = self.tiers.run_expiry_sweep(&iso8601(now)).await?;
        Ok(format!("downgraded {downgraded} lapsed terms"))
    }
}

struct RetentionJob {
    store: Arc<dyn IdentityStore>,
    retention_days: i64,
}

#[async_trait]
impl MaintenanceJob for RetentionJob {
    fn name(&self) -> &'static str {
        "followup_retention"
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<String> {
        let cutoff = iso8601(now - chrono::Duration::days(self.retention_days));
        let pruned = self.store.prune_followups(&cutoff).await?;
        Ok(format!("pruned {pruned} terminal follow-ups"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use chrono::TimeZone;
    use kiln_config::model::StorageConfig;
    use kiln_storage::SqliteStore;
    use tempfile::tempdir;

    use super::*;
    use crate::rotation::Rotator;

    struct CountingJob {
        runs: Arc<AtomicU64>,
    }

    #[async_trait]
    impl MaintenanceJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self, _now: DateTime<Utc>) -> Result<String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok("counted".to_string())
        }
    }

    async fn open_store() -> (Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("pool.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let store = SqliteStore::new(config);
        store.initialize().await.unwrap();
        (Arc::new(store), dir)
    }

    fn bare_runner(store: Arc<SqliteStore>) -> MaintenanceRunner {
        MaintenanceRunner {
            tick_interval: Duration::from_secs(1),
            store,
            slots: Vec::new(),
        }
    }

    #[test]
    fn cadences_require_six_fields() {
        assert!(parse_cadence("health_sweep", "0 0 * * * *").is_ok());
        let err = parse_cadence("health_sweep", "0 * * * *").unwrap_err();
        match err {
            KilnError::Config(message) => assert!(message.contains("health_sweep")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn due_jobs_run_once_per_occurrence() {
        let (store, _dir) = open_store().await;
        let runs = Arc::new(AtomicU64::new(0));
        let mut runner = bare_runner(store.clone());
        runner
            .add_job(Box::new(CountingJob { runs: runs.clone() }), "* * * * * *")
            .unwrap();
        runner.seed().await.unwrap();

        let now = Utc::now();
        let first = now + chrono::Duration::seconds(2);
        assert_eq!(runner.tick(first).await, vec!["counting"]);
        // The same instant again: the slot was rescheduled strictly later.
        assert!(runner.tick(first).await.is_empty());
        assert_eq!(
            runner.tick(now + chrono::Duration::seconds(4)).await,
            vec!["counting"]
        );

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(store.job_last_run("counting").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn restart_resumes_from_the_persisted_stamp() {
        let (store, _dir) = open_store().await;
        store
            .stamp_job_run("counting", "2027-01-01T12:00:00.000Z")
            .await
            .unwrap();

        let runs = Arc::new(AtomicU64::new(0));
        let mut runner = bare_runner(store.clone());
        runner
            .add_job(Box::new(CountingJob { runs: runs.clone() }), "0 0 * * * *")
            .unwrap();
        runner.seed().await.unwrap();

        // The noon run already happened before the restart.
        let half_past = Utc.with_ymd_and_hms(2027, 1, 1, 12, 30, 0).unwrap();
        assert!(runner.tick(half_past).await.is_empty());

        let one_pm = Utc.with_ymd_and_hms(2027, 1, 1, 13, 0, 0).unwrap();
        assert_eq!(runner.tick(one_pm).await, vec!["counting"]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn standard_jobs_wire_up_in_order() {
        let (store, _dir) = open_store().await;
        let rotator = Arc::new(Rotator::new(PoolConfig::default(), store.clone()));
        let health = Arc::new(HealthChecker::new(store.clone(), rotator));
        let warmups = Arc::new(WarmupRunner::new(store.clone()));
        let tiers = Arc::new(TierManager::new(store.clone()));

        let mut runner = MaintenanceRunner::new(
            &MaintenanceConfig::default(),
            &PoolConfig::default(),
            store.clone(),
            health,
            warmups,
            tiers,
        )
        .unwrap();
        runner.seed().await.unwrap();

        let later = Utc.with_ymd_and_hms(9999, 1, 1, 12, 0, 0).unwrap();
        let ran = runner.tick(later).await;
        assert_eq!(
            ran,
            vec![
                "health_sweep",
                "daily_reset",
                "warmup_advance",
                "tier_expiry",
                "followup_retention"
            ]
        );
        for name in ran {
            assert!(store.job_last_run(name).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn bad_cadence_fails_wiring() {
        let (store, _dir) = open_store().await;
        let rotator = Arc::new(Rotator::new(PoolConfig::default(), store.clone()));
        let health = Arc::new(HealthChecker::new(store.clone(), rotator));
        let warmups = Arc::new(WarmupRunner::new(store.clone()));
        let tiers = Arc::new(TierManager::new(store.clone()));

        let maintenance = MaintenanceConfig {
            warmup_cron: "soon".to_string(),
            ..MaintenanceConfig::default()
        };
        let err = MaintenanceRunner::new(
            &maintenance,
            &PoolConfig::default(),
            store,
            health,
            warmups,
            tiers,
        )
        .unwrap_err();
        match err {
            KilnError::Config(message) => assert!(message.contains("warmup_advance")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
