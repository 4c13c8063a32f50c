// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared domain types for the sending-identity pool.
//!
//! Everything here is plain data: the records the store persists and the
//! enums that gate policy decisions. Behavior lives in [`crate::lifecycle`],
//! [`crate::warmup`], [`crate::health`], and [`crate::tier`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::{KilnError, Result};
use crate::warmup::WarmupStep;

/// What kind of sending identity a record describes.
///
/// Domains and mailboxes share one lifecycle but carry different health
/// thresholds; a domain aggregates the traffic of every mailbox under it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Domain,
    Mailbox,
}

/// Position of an identity in the warmup/rotation lifecycle.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Provisioned but never ramped; sends nothing.
    Cold,
    /// On the ramp schedule with a daily cap that grows step by step.
    Warming,
    /// Fully ramped and eligible for campaign assignment.
    Warm,
    /// Deliberately paused; counters freeze and no sending happens.
    Cooling,
    /// Pulled from sending after a health failure or manual rotation.
    Burned,
    /// Terminal. Kept for audit, never sends again.
    Retired,
}

impl LifecycleState {
    /// States that may still return to sending. `burned` is excluded: the
    /// only way forward from there is retirement.
    pub fn is_live(self) -> bool {
        !matches!(self, LifecycleState::Burned | LifecycleState::Retired)
    }

    /// Only terminal state in the machine.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Retired)
    }
}

/// Billing tier attached to an identity. Limits per tier come from
/// [`crate::tier::TierLimits::for_tier`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingTier {
    Free,
    Starter,
    Pro,
    Enterprise,
}

/// Why an identity was burned. Stored on the record and echoed into the
/// rotation follow-up so operators can see the trigger later.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    ReputationBelowThreshold,
    HighSpamComplaints,
    HighBounceRate,
    SpamComplaintThreshold,
    ManualRotation,
}

/// Coarse health grade derived from bounce and spam rates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Per-message delivery outcome reported by the sending transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SendEvent {
    Delivered,
    BouncedHard,
    BouncedSoft,
    SpamComplaint,
    Reply,
}

/// Processing status of a rotation follow-up work item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FollowupStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One sending identity as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    /// Domain name or full mailbox address. Unique across the pool.
    pub address: String,
    pub kind: IdentityKind,
    /// Owning tenant. `None` means the identity belongs to the shared pool.
    pub tenant_id: Option<String>,
    /// Shared identities are assignable to any tenant regardless of owner.
    pub shared: bool,
    pub lifecycle_state: LifecycleState,
    /// Sender reputation in `[0.0, 1.0]`. Starts at 1.0 and decays as
    /// negative delivery events arrive.
    pub reputation_score: f64,
    /// Cached output of the last health evaluation, `1.0 - bounce - spam`.
    pub deliverability_score: f64,
    pub health_status: Option<HealthStatus>,
    /// Messages attempted since the last daily reset.
    pub sent_today: i64,
    /// Messages attempted over the identity's whole life.
    pub sent_total: i64,
    pub bounces: i64,
    pub spam_complaints: i64,
    pub replies_received: i64,
    /// Current step on the ramp, 1-based. Zero until warmup starts.
    pub warmup_day: i64,
    /// Daily cap imposed by the current warmup step. Zero outside warmup.
    pub warmup_target: i64,
    /// JSON-encoded `Vec<WarmupStep>` materialized when warmup starts.
    pub warmup_schedule: Option<String>,
    /// Stamped when the last ramp step is passed.
    pub warmup_completed_at: Option<String>,
    /// Stamped each time the ramp advances; the daily job uses it to
    /// advance each identity at most once per UTC day.
    pub warmup_advanced_at: Option<String>,
    pub billing_tier: BillingTier,
    pub daily_limit: i64,
    pub hourly_limit: i64,
    pub auto_renew: bool,
    pub purchased_at: Option<String>,
    pub expires_at: Option<String>,
    /// Campaign currently holding this identity, if any.
    pub assigned_campaign_id: Option<String>,
    pub last_used_at: Option<String>,
    pub last_health_check_at: Option<String>,
    pub rotated_at: Option<String>,
    pub rotation_reason: Option<RotationReason>,
    /// Optimistic concurrency counter. Bumped by every state, assignment,
    /// warmup, or tier mutation; plain counter increments leave it alone.
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl IdentityRecord {
    /// Whether the allocator may hand this identity to a campaign right now.
    pub fn is_assignable(&self) -> bool {
        self.lifecycle_state == LifecycleState::Warm
            && self.assigned_campaign_id.is_none()
            && self.sent_today < self.daily_limit
    }

    /// Volume-per-problem ordering key used by the allocator. Higher is
    /// better; the `+ 1` keeps the denominator nonzero so fresh identities
    /// rank by raw volume.
    pub fn quality_proxy(&self) -> f64 {
        self.sent_total as f64 / (self.bounces + self.spam_complaints + 1) as f64
    }

    /// Sends left under today's cap.
    pub fn remaining_today(&self) -> i64 {
        (self.daily_limit - self.sent_today).max(0)
    }

    /// Decode the materialized warmup schedule.
    pub fn warmup_steps(&self) -> Result<Vec<WarmupStep>> {
        match &self.warmup_schedule {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                KilnError::Internal(format!(
                    "corrupt warmup schedule on identity {}: {e}",
                    self.id
                ))
            }),
        }
    }
}

/// Parameters for provisioning a new identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIdentity {
    pub address: String,
    pub kind: IdentityKind,
    pub tenant_id: Option<String>,
    pub shared: bool,
    pub billing_tier: BillingTier,
    pub auto_renew: bool,
}

/// One row of the append-only lifecycle transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub id: i64,
    pub identity_id: String,
    pub from_state: LifecycleState,
    pub to_state: LifecycleState,
    /// Who drove the edge: `operator`, `health_sweep`, `warmup_job`, ...
    pub actor: String,
    pub reason: Option<String>,
    pub created_at: String,
}

/// Durable work item asking an operator or downstream system to finish a
/// rotation (DNS records, inbox provider signup, campaign re-pointing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupItem {
    pub id: i64,
    pub status: FollowupStatus,
    /// Lower runs first.
    pub priority: i64,
    /// JSON-encoded [`RotationFollowup`].
    pub payload: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub locked_until: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FollowupItem {
    pub fn rotation(&self) -> Result<RotationFollowup> {
        serde_json::from_str(&self.payload).map_err(|e| {
            KilnError::Internal(format!("corrupt follow-up payload {}: {e}", self.id))
        })
    }
}

/// Payload of a rotation follow-up.
///
/// `new_identity == None` is the capacity-shortfall signal: the pool had no
/// warm replacement, so the affected campaign is parked until one exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationFollowup {
    pub old_identity: String,
    pub new_identity: Option<String>,
    pub reason: RotationReason,
    pub campaign_id: Option<String>,
    pub tenant_id: Option<String>,
}

/// Result of atomically burning an identity and vacating its assignment.
#[derive(Debug, Clone)]
pub struct BurnOutcome {
    /// The identity after the burn edge was applied.
    pub identity: IdentityRecord,
    /// Campaign the identity was serving at burn time, if any.
    pub vacated_campaign: Option<String>,
}

/// What a completed rotation produced, returned to API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationOutcome {
    pub burned: IdentityRecord,
    pub replacement: Option<IdentityRecord>,
    pub reason: RotationReason,
    pub followup_id: i64,
}

/// Aggregate view of the pool served by `GET /v1/pool/summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSummary {
    pub total: i64,
    pub by_state: BTreeMap<LifecycleState, i64>,
    pub by_kind: BTreeMap<IdentityKind, i64>,
    pub assigned: i64,
    /// Warm, unassigned, and under today's cap.
    pub available: i64,
    pub sent_today: i64,
    /// Sum of `daily_limit` across warm identities.
    pub daily_capacity: i64,
    /// `sent_today / daily_capacity`, zero when there is no capacity.
    pub utilization: f64,
    pub average_reputation: f64,
}

impl PoolSummary {
    /// Fold a full pool listing into the aggregate view.
    pub fn from_records(records: &[IdentityRecord]) -> PoolSummary {
        let mut by_state: BTreeMap<LifecycleState, i64> = BTreeMap::new();
        let mut by_kind: BTreeMap<IdentityKind, i64> = BTreeMap::new();
        let mut assigned = 0;
        let mut available = 0;
        let mut sent_today = 0;
        let mut daily_capacity = 0;
        let mut reputation_sum = 0.0;
        for r in records {
            *by_state.entry(r.lifecycle_state).or_insert(0) += 1;
            *by_kind.entry(r.kind).or_insert(0) += 1;
            if r.assigned_campaign_id.is_some() {
                assigned += 1;
            }
            if r.is_assignable() {
                available += 1;
            }
            sent_today += r.sent_today;
            if r.lifecycle_state == LifecycleState::Warm {
                daily_capacity += r.daily_limit;
            }
            reputation_sum += r.reputation_score;
        }
        let total = records.len() as i64;
        let utilization = if daily_capacity > 0 {
            sent_today as f64 / daily_capacity as f64
        } else {
            0.0
        };
        let average_reputation = if total > 0 {
            reputation_sum / total as f64
        } else {
            0.0
        };
        PoolSummary {
            total,
            by_state,
            by_kind,
            assigned,
            available,
            sent_today,
            daily_capacity,
            utilization,
            average_reputation,
        }
    }
}

/// An instant in the ISO-8601 shape used throughout the store.
pub fn iso8601(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Current UTC time in the ISO-8601 shape used throughout the store.
pub fn now_iso8601() -> String {
    iso8601(chrono::Utc::now())
}

/// Current UTC calendar date, `YYYY-MM-DD`.
pub fn today_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
