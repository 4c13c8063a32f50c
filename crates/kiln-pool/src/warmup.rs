// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Warmup ramp execution.
//!
//! Starting a ramp materializes the full plan onto the record. The daily
//! runner then advances each due identity one step, reading the next day
//! from the materialized plan rather than the compiled-in defaults, so a
//! ramp already in flight is immune to later changes to the default plan.
//! An identity whose plan is exhausted completes to `warm`.

use std::sync::Arc;

use kiln_core::error::{KilnError, Result};
use kiln_core::types::IdentityRecord;
use kiln_core::warmup::{self, WarmupStep};
use kiln_core::IdentityStore;
use tracing::{info, warn};

/// Actor recorded on transitions applied by the scheduled runner.
const SCHEDULER_ACTOR: &str = "scheduler";

/// Tallies from one daily warmup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupSweep {
    pub advanced: u64,
    pub completed: u64,
    pub skipped: u64,
}

/// Starts ramps and walks them forward once per day.
pub struct WarmupRunner {
    store: Arc<dyn IdentityStore>,
}

impl WarmupRunner {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Start the ramp for a cold identity at day 1.
    pub async fn start(
        &self,
        identity_id: &str,
        expected_version: i64,
        actor: &str,
    ) -> Result<IdentityRecord> {
        let schedule = warmup::schedule_json()?;
        let started = self
            .store
            .begin_warmup(
                identity_id,
                expected_version,
                &schedule,
                warmup::RAMP_TARGETS[0],
                actor,
            )
            .await?;
        info!(
            identity_id,
            target = started.warmup_target,
            days = warmup::final_day(),
            "warmup ramp started"
        );
        Ok(started)
    }

    /// Advance every ramp that has not yet moved on `today` (UTC
    /// `YYYY-MM-DD`). Identities past the final day of their plan complete
    /// to `warm`. A row that moved or went bad under us is skipped and
    /// picked up by a later pass.
    pub async fn run_daily(&self, today: &str) -> Result<WarmupSweep> {
        let due = self.store.list_due_warmups(today).await?;
        let mut sweep = WarmupSweep::default();
        for identity in due {
            match self.advance_one(&identity).await {
                Ok(true) => sweep.completed += 1,
                Ok(false) => sweep.advanced += 1,
                Err(
                    e @ (KilnError::Conflict(_)
                    | KilnError::InvalidState { .. }
                    | KilnError::Internal(_)),
                ) => {
                    warn!(identity_id = %identity.id, error = %e, "skipping ramp this pass");
                    sweep.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if sweep != WarmupSweep::default() {
            info!(
                advanced = sweep.advanced,
                completed = sweep.completed,
                skipped = sweep.skipped,
                "warmup pass complete"
            );
        }
        kiln_metrics::record_warmup_steps(sweep.advanced, sweep.completed);
        Ok(sweep)
    }

    /// Move one identity a single step. Returns `true` when it completed
    /// to `warm`.
    async fn advance_one(&self, identity: &IdentityRecord) -> Result<bool> {
        match next_step(identity)? {
            Some(step) => {
                self.store
                    .advance_warmup(&identity.id, identity.version, step.day, step.target)
                    .await?;
                Ok(false)
            }
            None => {
                self.store
                    .complete_warmup(&identity.id, identity.version, SCHEDULER_ACTOR)
                    .await?;
                Ok(true)
            }
        }
    }
}

/// Next step of the plan materialized on the record, `None` once the plan
/// is exhausted.
fn next_step(identity: &IdentityRecord) -> Result<Option<WarmupStep>> {
    let raw = identity.warmup_schedule.as_deref().ok_or_else(|| {
        KilnError::Internal(format!(
            "identity `{}` is warming without a materialized ramp",
            identity.id
        ))
    })?;
    let plan: Vec<WarmupStep> = serde_json::from_str(raw)
        .map_err(|e| KilnError::Internal(format!("decode ramp for `{}`: {e}", identity.id)))?;
    let next_day = identity.warmup_day + 1;
    Ok(plan.into_iter().find(|step| step.day == next_day))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kiln_config::model::StorageConfig;
    use kiln_core::tier::TierLimits;
    use kiln_core::types::{BillingTier, IdentityKind, LifecycleState, NewIdentity};
    use kiln_storage::{Database, SqliteStore};
    use rusqlite::params;
    use tempfile::tempdir;

    use super::*;

    /// A date past any real clock, so every warming row counts as due.
    const ALWAYS_DUE: &str = "9999-01-01";

    async fn pool() -> (WarmupRunner, Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("pool.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let store = SqliteStore::new(config);
        store.initialize().await.unwrap();
        let store = Arc::new(store);
        let runner = WarmupRunner::new(store.clone());
        (runner, store, dir)
    }

    async fn raw(dir: &tempfile::TempDir) -> Database {
        Database::open(dir.path().join("pool.db").to_str().unwrap(), true)
            .await
            .unwrap()
    }

    async fn provision(store: &SqliteStore, address: &str) -> IdentityRecord {
        let new = NewIdentity {
            address: address.to_string(),
            kind: IdentityKind::Mailbox,
            tenant_id: None,
            shared: true,
            billing_tier: BillingTier::Free,
            auto_renew: false,
        };
        store
            .create_identity(&new, &TierLimits::for_tier(BillingTier::Free))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_ramp_reaches_warm_in_fourteen_passes() {
        let (runner, store, _dir) = pool().await;
        let cold = provision(&store, "ramp@pool.example.com").await;

        let started = runner.start(&cold.id, cold.version, "ops").await.unwrap();
        assert_eq!(started.lifecycle_state, LifecycleState::Warming);
        assert_eq!(started.warmup_day, 1);
        assert_eq!(started.warmup_target, 5);

        // Thirteen passes walk days 2 through 14.
        for pass in 0..13 {
            let sweep = runner.run_daily(ALWAYS_DUE).await.unwrap();
            assert_eq!(sweep.advanced, 1, "pass {pass} should advance");
            assert_eq!(sweep.completed, 0);
        }
        let mid = store.get_identity(&cold.id).await.unwrap().unwrap();
        assert_eq!(mid.warmup_day, 14);
        assert_eq!(mid.warmup_target, 300);
        assert_eq!(mid.lifecycle_state, LifecycleState::Warming);

        // The fourteenth pass finds the plan exhausted and completes.
        let last = runner.run_daily(ALWAYS_DUE).await.unwrap();
        assert_eq!(last.completed, 1);
        assert_eq!(last.advanced, 0);

        let warm = store.get_identity(&cold.id).await.unwrap().unwrap();
        assert_eq!(warm.lifecycle_state, LifecycleState::Warm);
        assert_eq!(warm.warmup_day, 14);
        assert!(warm.warmup_completed_at.is_some());

        // Nothing left to do.
        let idle = runner.run_daily(ALWAYS_DUE).await.unwrap();
        assert_eq!(idle, WarmupSweep::default());
    }

    #[tokio::test]
    async fn start_requires_a_cold_identity() {
        let (runner, store, _dir) = pool().await;
        let cold = provision(&store, "once@pool.example.com").await;
        let started = runner.start(&cold.id, cold.version, "ops").await.unwrap();

        let err = runner
            .start(&cold.id, started.version, "ops")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KilnError::InvalidState {
                actual: LifecycleState::Warming,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn ramp_follows_the_materialized_plan() {
        let (runner, store, dir) = pool().await;
        let cold = provision(&store, "custom@pool.example.com").await;
        runner.start(&cold.id, cold.version, "ops").await.unwrap();

        // Shrink the materialized plan to two days with a custom target.
        let db = raw(&dir).await;
        let id = cold.id.clone();
        db.connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE identities SET warmup_schedule = ?1 WHERE id = ?2",
                    params![r#"[{"day":1,"target":5},{"day":2,"target":7}]"#, id],
                )
            })
            .await
            .unwrap();

        let sweep = runner.run_daily(ALWAYS_DUE).await.unwrap();
        assert_eq!(sweep.advanced, 1);
        let day2 = store.get_identity(&cold.id).await.unwrap().unwrap();
        assert_eq!(day2.warmup_target, 7, "target must come from the stored plan");

        // Two-day plan exhausts on the next pass, well before day 14.
        let sweep = runner.run_daily(ALWAYS_DUE).await.unwrap();
        assert_eq!(sweep.completed, 1);
        let warm = store.get_identity(&cold.id).await.unwrap().unwrap();
        assert_eq!(warm.lifecycle_state, LifecycleState::Warm);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn broken_plan_is_skipped_not_fatal() {
        let (runner, store, dir) = pool().await;
        let broken = provision(&store, "broken@pool.example.com").await;
        let healthy = provision(&store, "healthy@pool.example.com").await;
        runner.start(&broken.id, broken.version, "ops").await.unwrap();
        runner.start(&healthy.id, healthy.version, "ops").await.unwrap();

        let db = raw(&dir).await;
        let id = broken.id.clone();
        db.connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE identities SET warmup_schedule = NULL WHERE id = ?1",
                    params![id],
                )
            })
            .await
            .unwrap();

        let sweep = runner.run_daily(ALWAYS_DUE).await.unwrap();
        assert_eq!(sweep.skipped, 1);
        assert_eq!(sweep.advanced, 1, "the healthy ramp must still move");

        db.close().await.unwrap();
    }
}
