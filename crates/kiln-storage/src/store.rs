// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`IdentityStore`] trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use kiln_config::model::StorageConfig;
use kiln_core::tier::TierLimits;
use kiln_core::types::{
    BillingTier, BurnOutcome, FollowupItem, FollowupStatus, HealthStatus, IdentityRecord,
    LifecycleState, NewIdentity, RotationReason, TransitionEntry,
};
use kiln_core::{IdentityStore, KilnError, Result};

use crate::database::Database;
use crate::queries;

/// SQLite-backed identity store.
///
/// Wraps a [`Database`] handle and delegates every operation to the typed
/// query modules. The database is not opened until [`SqliteStore::initialize`]
/// runs, so construction is infallible and configuration errors surface at
/// startup.
pub struct SqliteStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStore {
    /// Create a store over the given configuration without opening it.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Open the database, apply pragmas, and run pending migrations.
    pub async fn initialize(&self) -> Result<()> {
        let db = Database::open(&self.config.database_path, self.config.wal_mode).await?;
        self.db
            .set(db)
            .map_err(|_| KilnError::Internal("store already initialized".to_string()))?;
        debug!(path = %self.config.database_path, "sqlite identity store initialized");
        Ok(())
    }

    /// Checkpoint the WAL ahead of shutdown.
    pub async fn close(&self) -> Result<()> {
        if let Some(db) = self.db.get() {
            db.close().await?;
            debug!("wal checkpoint complete");
        }
        Ok(())
    }

    fn db(&self) -> Result<&Database> {
        self.db.get().ok_or_else(|| {
            KilnError::Internal("store not initialized, call initialize() first".to_string())
        })
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> rusqlite::Result<()> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)
    }

    // --- Provisioning and reads ---

    async fn create_identity(
        &self,
        new: &NewIdentity,
        limits: &TierLimits,
    ) -> Result<IdentityRecord> {
        queries::identities::create_identity(self.db()?, new, limits).await
    }

    async fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>> {
        queries::identities::get_identity(self.db()?, id).await
    }

    async fn get_identity_by_address(&self, address: &str) -> Result<Option<IdentityRecord>> {
        queries::identities::get_identity_by_address(self.db()?, address).await
    }

    async fn list_identities(
        &self,
        state: Option<LifecycleState>,
    ) -> Result<Vec<IdentityRecord>> {
        queries::identities::list_identities(self.db()?, state).await
    }

    // --- Delivery counters ---

    async fn record_send(&self, id: &str) -> Result<()> {
        queries::identities::record_send(self.db()?, id).await
    }

    async fn record_bounce(&self, id: &str) -> Result<()> {
        queries::identities::record_bounce(self.db()?, id).await
    }

    async fn record_spam_complaint(&self, id: &str) -> Result<()> {
        queries::identities::record_spam_complaint(self.db()?, id).await
    }

    async fn record_reply(&self, id: &str) -> Result<()> {
        queries::identities::record_reply(self.db()?, id).await
    }

    async fn adjust_reputation(&self, id: &str, delta: f64) -> Result<f64> {
        queries::identities::adjust_reputation(self.db()?, id, delta).await
    }

    async fn stamp_health(
        &self,
        id: &str,
        status: HealthStatus,
        deliverability: f64,
    ) -> Result<()> {
        queries::identities::stamp_health(self.db()?, id, status, deliverability).await
    }

    // --- Lifecycle ---

    async fn transition_state(
        &self,
        id: &str,
        to: LifecycleState,
        expected_version: i64,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<IdentityRecord> {
        queries::lifecycle::transition_state(self.db()?, id, to, expected_version, actor, reason)
            .await
    }

    // --- Warmup ---

    async fn begin_warmup(
        &self,
        id: &str,
        expected_version: i64,
        schedule_json: &str,
        first_target: i64,
        actor: &str,
    ) -> Result<IdentityRecord> {
        queries::lifecycle::begin_warmup(
            self.db()?,
            id,
            expected_version,
            schedule_json,
            first_target,
            actor,
        )
        .await
    }

    async fn advance_warmup(
        &self,
        id: &str,
        expected_version: i64,
        day: i64,
        target: i64,
    ) -> Result<IdentityRecord> {
        queries::lifecycle::advance_warmup(self.db()?, id, expected_version, day, target).await
    }

    async fn complete_warmup(
        &self,
        id: &str,
        expected_version: i64,
        actor: &str,
    ) -> Result<IdentityRecord> {
        queries::lifecycle::complete_warmup(self.db()?, id, expected_version, actor).await
    }

    async fn list_due_warmups(&self, today: &str) -> Result<Vec<IdentityRecord>> {
        queries::lifecycle::list_due_warmups(self.db()?, today).await
    }

    // --- Allocation ---

    async fn assignment_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Option<IdentityRecord>> {
        queries::allocation::assignment_for_campaign(self.db()?, campaign_id).await
    }

    async fn allocation_candidates(
        &self,
        tenant_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<IdentityRecord>> {
        queries::allocation::allocation_candidates(self.db()?, tenant_id, limit).await
    }

    async fn claim_identity(&self, id: &str, campaign_id: &str) -> Result<bool> {
        queries::allocation::claim_identity(self.db()?, id, campaign_id).await
    }

    async fn release_identity(&self, id: &str) -> Result<IdentityRecord> {
        queries::allocation::release_identity(self.db()?, id).await
    }

    // --- Rotation ---

    async fn burn_identity(
        &self,
        id: &str,
        expected_version: i64,
        reason: RotationReason,
        actor: &str,
    ) -> Result<BurnOutcome> {
        queries::lifecycle::burn_identity(self.db()?, id, expected_version, reason, actor).await
    }

    async fn find_replacement(&self, tenant_id: Option<&str>) -> Result<Option<IdentityRecord>> {
        queries::allocation::find_replacement(self.db()?, tenant_id).await
    }

    // --- Billing tiers ---

    async fn apply_tier(
        &self,
        id: &str,
        expected_version: i64,
        tier: BillingTier,
        limits: &TierLimits,
        purchased_at: Option<&str>,
        expires_at: Option<&str>,
        auto_renew: bool,
    ) -> Result<IdentityRecord> {
        queries::tiers::apply_tier(
            self.db()?,
            id,
            expected_version,
            tier,
            limits,
            purchased_at,
            expires_at,
            auto_renew,
        )
        .await
    }

    async fn list_lapsed_tiers(&self, now: &str) -> Result<Vec<IdentityRecord>> {
        queries::tiers::list_lapsed(self.db()?, now).await
    }

    async fn downgrade_expired(
        &self,
        id: &str,
        now: &str,
        limits: &TierLimits,
    ) -> Result<Option<IdentityRecord>> {
        queries::tiers::downgrade_expired(self.db()?, id, now, limits).await
    }

    // --- Maintenance ---

    async fn reset_daily_counters(&self) -> Result<u64> {
        queries::identities::reset_daily_counters(self.db()?).await
    }

    async fn sweep_candidates(&self) -> Result<Vec<IdentityRecord>> {
        queries::identities::sweep_candidates(self.db()?).await
    }

    // --- Transition audit log ---

    async fn transitions_for(
        &self,
        identity_id: &str,
        limit: i64,
    ) -> Result<Vec<TransitionEntry>> {
        queries::lifecycle::transitions_for(self.db()?, identity_id, limit).await
    }

    // --- Rotation follow-ups ---

    async fn enqueue_followup(
        &self,
        priority: i64,
        payload: &str,
        max_attempts: i64,
    ) -> Result<i64> {
        queries::followups::enqueue(self.db()?, priority, payload, max_attempts).await
    }

    async fn dequeue_followup(&self, lock_seconds: i64) -> Result<Option<FollowupItem>> {
        queries::followups::dequeue(self.db()?, lock_seconds).await
    }

    async fn complete_followup(&self, id: i64) -> Result<()> {
        queries::followups::complete(self.db()?, id).await
    }

    async fn fail_followup(&self, id: i64) -> Result<()> {
        queries::followups::fail(self.db()?, id).await
    }

    async fn requeue_stale_followups(&self) -> Result<u64> {
        queries::followups::requeue_stale(self.db()?).await
    }

    async fn prune_followups(&self, older_than: &str) -> Result<u64> {
        queries::followups::prune(self.db()?, older_than).await
    }

    async fn count_followups(&self, status: FollowupStatus) -> Result<i64> {
        queries::followups::count(self.db()?, status).await
    }

    // --- Scheduled-job bookkeeping ---

    async fn job_last_run(&self, job: &str) -> Result<Option<String>> {
        queries::jobs::last_run(self.db()?, job).await
    }

    async fn stamp_job_run(&self, job: &str, at: &str) -> Result<()> {
        queries::jobs::stamp_run(self.db()?, job, at).await
    }
}
