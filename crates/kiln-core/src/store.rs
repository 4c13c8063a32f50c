// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The persistence seam.
//!
//! Pool services talk to storage exclusively through [`IdentityStore`] so
//! the policy crates never see SQL. The contract is deliberately mechanical:
//! conditional writes, atomic counters, and list queries. Which edge is
//! legal, which threshold fires, which tier grants what - all of that is
//! decided by callers using the pure modules in this crate. The store's own
//! responsibility is to enforce the version guard and re-validate lifecycle
//! edges inside its transaction, because the caller's read may be stale by
//! the time the write lands.

use async_trait::async_trait;

use crate::error::Result;
use crate::tier::TierLimits;
use crate::types::{
    BillingTier, BurnOutcome, FollowupItem, FollowupStatus, HealthStatus, IdentityRecord,
    LifecycleState, NewIdentity, RotationReason, TransitionEntry,
};

/// Durable backend for the identity pool.
///
/// Every guarded mutation takes `expected_version` and fails with
/// `Conflict` when the row moved underneath the caller; callers re-read and
/// re-decide. Counter increments are unguarded and never bump the version.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Cheap liveness probe used by `/health` and `kiln status`.
    async fn ping(&self) -> Result<()>;

    // Provisioning and reads.

    /// Insert a new cold identity with the given tier limits applied.
    /// Fails with `Conflict` when the address is already in the pool.
    async fn create_identity(
        &self,
        new: &NewIdentity,
        limits: &TierLimits,
    ) -> Result<IdentityRecord>;
    async fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>>;
    async fn get_identity_by_address(&self, address: &str) -> Result<Option<IdentityRecord>>;
    /// All identities, optionally filtered to one state, newest first.
    async fn list_identities(&self, state: Option<LifecycleState>) -> Result<Vec<IdentityRecord>>;

    // Delivery counters. Unguarded, version untouched.

    /// Count one send attempt: bumps `sent_today` and `sent_total`, stamps
    /// `last_used_at`.
    async fn record_send(&self, id: &str) -> Result<()>;
    async fn record_bounce(&self, id: &str) -> Result<()>;
    async fn record_spam_complaint(&self, id: &str) -> Result<()>;
    async fn record_reply(&self, id: &str) -> Result<()>;
    /// Apply a signed reputation delta, clamped to `[0, 1]`. Returns the
    /// score after the adjustment.
    async fn adjust_reputation(&self, id: &str, delta: f64) -> Result<f64>;
    /// Cache the outcome of a health evaluation on the record.
    async fn stamp_health(
        &self,
        id: &str,
        status: HealthStatus,
        deliverability: f64,
    ) -> Result<()>;

    // Lifecycle.

    /// Apply one state-machine edge under the version guard and append a
    /// row to the transition log. The edge is re-validated against the
    /// stored state inside the transaction.
    async fn transition_state(
        &self,
        id: &str,
        to: LifecycleState,
        expected_version: i64,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<IdentityRecord>;

    // Warmup.

    /// `cold -> warming` plus ramp materialization in one transaction:
    /// stores the schedule, sets day 1 and its target, stamps the advance
    /// marker.
    async fn begin_warmup(
        &self,
        id: &str,
        expected_version: i64,
        schedule_json: &str,
        first_target: i64,
        actor: &str,
    ) -> Result<IdentityRecord>;
    /// Move a warming identity to the given ramp day and target. Fails with
    /// `InvalidState` when the identity is not warming.
    async fn advance_warmup(
        &self,
        id: &str,
        expected_version: i64,
        day: i64,
        target: i64,
    ) -> Result<IdentityRecord>;
    /// `warming -> warm` plus completion stamp; the warmup target is lifted
    /// so the tier limit alone governs volume from here on.
    async fn complete_warmup(
        &self,
        id: &str,
        expected_version: i64,
        actor: &str,
    ) -> Result<IdentityRecord>;
    /// Warming identities whose ramp has not yet advanced on `today`
    /// (UTC calendar date, `YYYY-MM-DD`).
    async fn list_due_warmups(&self, today: &str) -> Result<Vec<IdentityRecord>>;

    // Allocation.

    /// The identity currently assigned to a campaign, if any.
    async fn assignment_for_campaign(&self, campaign_id: &str) -> Result<Option<IdentityRecord>>;
    /// Assignable identities visible to a tenant (its own plus the shared
    /// pool; `None` scopes to the shared pool alone), best quality first,
    /// least recently used breaking ties.
    async fn allocation_candidates(
        &self,
        tenant_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<IdentityRecord>>;
    /// Compare-and-set claim: succeeds only if the identity is still warm,
    /// unassigned, and under today's cap. Returns `false` when someone else
    /// won the race.
    async fn claim_identity(&self, id: &str, campaign_id: &str) -> Result<bool>;
    /// Clear the assignment if one exists. Idempotent.
    async fn release_identity(&self, id: &str) -> Result<IdentityRecord>;

    // Rotation.

    /// Burn an identity and vacate its assignment in one transaction,
    /// stamping `rotated_at` and the reason. Burning an already burned
    /// identity leaves the original stamp in place.
    async fn burn_identity(
        &self,
        id: &str,
        expected_version: i64,
        reason: RotationReason,
        actor: &str,
    ) -> Result<BurnOutcome>;
    /// Best assignable replacement for a tenant (or the shared pool when
    /// `None`), highest reputation first.
    async fn find_replacement(&self, tenant_id: Option<&str>) -> Result<Option<IdentityRecord>>;

    // Billing tiers.

    /// Rewrite tier, limits, and term stamps under the version guard.
    #[allow(clippy::too_many_arguments)]
    async fn apply_tier(
        &self,
        id: &str,
        expected_version: i64,
        tier: BillingTier,
        limits: &TierLimits,
        purchased_at: Option<&str>,
        expires_at: Option<&str>,
        auto_renew: bool,
    ) -> Result<IdentityRecord>;
    /// Paid identities whose term lapsed before `now` without auto-renew.
    async fn list_lapsed_tiers(&self, now: &str) -> Result<Vec<IdentityRecord>>;
    /// Downgrade one lapsed identity to the given (free) limits and clear
    /// its assignment. Returns `None` when the lapse condition no longer
    /// holds by the time the write runs.
    async fn downgrade_expired(
        &self,
        id: &str,
        now: &str,
        limits: &TierLimits,
    ) -> Result<Option<IdentityRecord>>;

    // Maintenance.

    /// Zero `sent_today` across the pool. Returns rows touched.
    async fn reset_daily_counters(&self) -> Result<u64>;
    /// Identities the scheduled health sweep re-evaluates: warm and warming.
    async fn sweep_candidates(&self) -> Result<Vec<IdentityRecord>>;

    // Transition audit log.

    /// Most recent transitions for one identity, newest first.
    async fn transitions_for(&self, identity_id: &str, limit: i64)
        -> Result<Vec<TransitionEntry>>;

    // Rotation follow-ups.

    async fn enqueue_followup(
        &self,
        priority: i64,
        payload: &str,
        max_attempts: i64,
    ) -> Result<i64>;
    /// Claim the next pending follow-up, moving it to `processing` with a
    /// lock that expires after `lock_seconds`.
    async fn dequeue_followup(&self, lock_seconds: i64) -> Result<Option<FollowupItem>>;
    async fn complete_followup(&self, id: i64) -> Result<()>;
    /// Count one failed attempt; the item returns to `pending` until its
    /// attempts are exhausted, then parks as `failed`.
    async fn fail_followup(&self, id: i64) -> Result<()>;
    /// Return `processing` items with expired locks to `pending`. Run at
    /// startup to recover work orphaned by a crash.
    async fn requeue_stale_followups(&self) -> Result<u64>;
    /// Delete terminal (`completed`/`failed`) items older than the cutoff.
    async fn prune_followups(&self, older_than: &str) -> Result<u64>;
    async fn count_followups(&self, status: FollowupStatus) -> Result<i64>;

    // Scheduled-job bookkeeping.

    async fn job_last_run(&self, job: &str) -> Result<Option<String>>;
    async fn stamp_job_run(&self, job: &str, at: &str) -> Result<()>;
}
