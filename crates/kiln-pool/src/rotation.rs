// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Burn-and-replace.
//!
//! Rotation burns a compromised identity, hands its campaign to the best
//! surviving candidate, and queues a follow-up work item so downstream
//! notifiers can reconfigure the campaign. Finding no replacement is a
//! degraded outcome recorded on the follow-up, never an error; the burned
//! identity itself is kept for the audit trail.

use std::sync::Arc;

use kiln_config::model::PoolConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::types::{
    BurnOutcome, IdentityRecord, RotationFollowup, RotationOutcome, RotationReason,
};
use kiln_core::IdentityStore;
use tracing::{info, warn};

/// Queue priority for rotation follow-ups. Lower is served first; the
/// queue default is 100, so rotation work jumps ahead of routine items.
pub const ROTATION_PRIORITY: i64 = 10;

/// Burns identities and lines up their successors.
pub struct Rotator {
    config: PoolConfig,
    store: Arc<dyn IdentityStore>,
}

impl Rotator {
    pub fn new(config: PoolConfig, store: Arc<dyn IdentityStore>) -> Self {
        Self { config, store }
    }

    /// Burn an identity and line up its successor.
    ///
    /// The burn vacates any campaign assignment in the same transaction;
    /// when one was vacated, the replacement (if any) is claimed for it so
    /// the campaign keeps sending. A follow-up item is queued in every
    /// case, with `new_identity` empty on a capacity shortfall.
    pub async fn rotate(
        &self,
        identity_id: &str,
        expected_version: i64,
        reason: RotationReason,
        actor: &str,
    ) -> Result<RotationOutcome> {
        let BurnOutcome {
            identity: burned,
            vacated_campaign,
        } = self
            .store
            .burn_identity(identity_id, expected_version, reason, actor)
            .await?;

        let replacement = self.replace(&burned, vacated_campaign.as_deref()).await?;
        if replacement.is_none() {
            warn!(
                identity_id = %burned.id,
                campaign = vacated_campaign.as_deref().unwrap_or("none"),
                "no qualified replacement, capacity shortfall"
            );
        }

        let followup = RotationFollowup {
            old_identity: burned.id.clone(),
            new_identity: replacement.as_ref().map(|r| r.id.clone()),
            reason,
            campaign_id: vacated_campaign.clone(),
            tenant_id: burned.tenant_id.clone(),
        };
        let payload = serde_json::to_string(&followup)
            .map_err(|e| KilnError::Internal(format!("encode rotation follow-up: {e}")))?;
        let followup_id = self
            .store
            .enqueue_followup(ROTATION_PRIORITY, &payload, self.config.followup_max_attempts)
            .await?;

        info!(
            burned = %burned.id,
            replacement = replacement.as_ref().map_or("none", |r| r.id.as_str()),
            reason = %reason,
            followup_id,
            "identity rotated"
        );
        kiln_metrics::record_rotation(&reason.to_string());

        Ok(RotationOutcome {
            burned,
            replacement,
            reason,
            followup_id,
        })
    }

    /// Best stand-in visible to the burned identity's tenant. Claimed for
    /// the vacated campaign when there is one; reported unclaimed when the
    /// burn vacated nothing.
    async fn replace(
        &self,
        burned: &IdentityRecord,
        vacated_campaign: Option<&str>,
    ) -> Result<Option<IdentityRecord>> {
        let Some(candidate) = self
            .store
            .find_replacement(burned.tenant_id.as_deref())
            .await?
        else {
            return Ok(None);
        };
        let Some(campaign_id) = vacated_campaign else {
            return Ok(Some(candidate));
        };
        if self.store.claim_identity(&candidate.id, campaign_id).await? {
            return self.store.get_identity(&candidate.id).await;
        }
        warn!(
            candidate = %candidate.id,
            campaign_id,
            "replacement claim lost a race, campaign left unassigned"
        );
        Ok(None)
    }
}
