// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Billing tier lifecycle.
//!
//! A tier change applies the new limit row immediately; paid tiers also
//! open a thirty-day term on the record. The nightly sweep walks lapsed
//! terms and drops them back to free, clearing any campaign assignment so
//! a downgraded identity re-enters rotation under free-tier caps.

use std::sync::Arc;

use chrono::Utc;
use kiln_core::error::Result;
use kiln_core::tier::{TierLimits, TERM_DAYS};
use kiln_core::types::{iso8601, BillingTier, IdentityRecord};
use kiln_core::IdentityStore;
use tracing::{info, warn};

/// Applies tier changes and expires lapsed paid terms.
pub struct TierManager {
    store: Arc<dyn IdentityStore>,
}

impl TierManager {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Move an identity to `tier` under the version guard.
    ///
    /// Paid tiers stamp a term of [`TERM_DAYS`] from now; moving to the
    /// free tier clears both term stamps.
    pub async fn change_tier(
        &self,
        identity_id: &str,
        expected_version: i64,
        tier: BillingTier,
        auto_renew: bool,
    ) -> Result<IdentityRecord> {
        let limits = TierLimits::for_tier(tier);
        let (purchased_at, expires_at) = if limits.monthly_price_usd == 0 {
            (None, None)
        } else {
            let now = Utc::now();
            (
                Some(iso8601(now)),
                Some(iso8601(now + chrono::Duration::days(TERM_DAYS))),
            )
        };
        let updated = self
            .store
            .apply_tier(
                identity_id,
                expected_version,
                tier,
                &limits,
                purchased_at.as_deref(),
                expires_at.as_deref(),
                auto_renew,
            )
            .await?;
        info!(
            identity_id,
            tier = %tier,
            daily_limit = limits.daily_limit,
            expires_at = updated.expires_at.as_deref().unwrap_or("never"),
            "tier changed"
        );
        Ok(updated)
    }

    /// Downgrade every paid identity whose term lapsed before `now` and
    /// is not set to auto-renew. Returns the number downgraded.
    pub async fn run_expiry_sweep(&self, now: &str) -> Result<u64> {
        let lapsed = self.store.list_lapsed_tiers(now).await?;
        let free = TierLimits::for_tier(BillingTier::Free);
        let mut downgraded = 0u64;
        for identity in lapsed {
            match self
                .store
                .downgrade_expired(&identity.id, now, &free)
                .await?
            {
                Some(updated) => {
                    downgraded += 1;
                    info!(
                        identity_id = %updated.id,
                        from = %identity.billing_tier,
                        "paid term lapsed, downgraded to free"
                    );
                }
                // The term was renewed or re-purchased between the listing
                // and the write.
                None => warn!(identity_id = %identity.id, "lapse no longer holds, skipped"),
            }
        }
        Ok(downgraded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;
    use kiln_config::model::StorageConfig;
    use kiln_core::error::KilnError;
    use kiln_core::types::{IdentityKind, LifecycleState, NewIdentity};
    use kiln_storage::SqliteStore;
    use tempfile::tempdir;

    use super::*;

    /// Later than any stamp a test writes; makes every open term lapsed.
    const LONG_AFTER: &str = "9999-01-01T00:00:00.000Z";

    async fn pool() -> (TierManager, Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("pool.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let store = SqliteStore::new(config);
        store.initialize().await.unwrap();
        let store = Arc::new(store);
        let tiers = TierManager::new(store.clone());
        (tiers, store, dir)
    }

    async fn provision_warm(store: &SqliteStore, address: &str) -> IdentityRecord {
        let new = NewIdentity {
            address: address.to_string(),
            kind: IdentityKind::Mailbox,
            tenant_id: None,
            shared: true,
            billing_tier: BillingTier::Free,
            auto_renew: false,
        };
        let r = store
            .create_identity(&new, &TierLimits::for_tier(BillingTier::Free))
            .await
            .unwrap();
        let r = store
            .transition_state(&r.id, LifecycleState::Warming, r.version, "test", None)
            .await
            .unwrap();
        store
            .transition_state(&r.id, LifecycleState::Warm, r.version, "test", None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upgrade_opens_a_thirty_day_term() {
        let (tiers, store, _dir) = pool().await;
        let id = provision_warm(&store, "paid@pool.example.com").await;

        let upgraded = tiers
            .change_tier(&id.id, id.version, BillingTier::Pro, false)
            .await
            .unwrap();

        assert_eq!(upgraded.billing_tier, BillingTier::Pro);
        assert_eq!(upgraded.daily_limit, 2000);
        assert_eq!(upgraded.hourly_limit, 200);
        let purchased =
            DateTime::parse_from_rfc3339(upgraded.purchased_at.as_deref().unwrap()).unwrap();
        let expires =
            DateTime::parse_from_rfc3339(upgraded.expires_at.as_deref().unwrap()).unwrap();
        assert_eq!((expires - purchased).num_days(), TERM_DAYS);

        // The stale pre-upgrade version must not apply a second change.
        let err = tiers
            .change_tier(&id.id, id.version, BillingTier::Starter, false)
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::Conflict(_)));
    }

    #[tokio::test]
    async fn moving_to_free_clears_the_term() {
        let (tiers, store, _dir) = pool().await;
        let id = provision_warm(&store, "lapser@pool.example.com").await;
        let paid = tiers
            .change_tier(&id.id, id.version, BillingTier::Starter, false)
            .await
            .unwrap();
        assert!(paid.expires_at.is_some());

        let free = tiers
            .change_tier(&id.id, paid.version, BillingTier::Free, false)
            .await
            .unwrap();
        assert_eq!(free.billing_tier, BillingTier::Free);
        assert_eq!(free.daily_limit, 50);
        assert!(free.purchased_at.is_none());
        assert!(free.expires_at.is_none());
    }

    #[tokio::test]
    async fn expiry_sweep_downgrades_and_frees_the_assignment() {
        let (tiers, store, _dir) = pool().await;
        let id = provision_warm(&store, "expired@pool.example.com").await;
        let paid = tiers
            .change_tier(&id.id, id.version, BillingTier::Pro, false)
            .await
            .unwrap();
        assert!(store.claim_identity(&paid.id, "camp-1").await.unwrap());

        let downgraded = tiers.run_expiry_sweep(LONG_AFTER).await.unwrap();
        assert_eq!(downgraded, 1);

        let after = store.get_identity(&id.id).await.unwrap().unwrap();
        assert_eq!(after.billing_tier, BillingTier::Free);
        assert_eq!(after.daily_limit, 50);
        assert!(after.assigned_campaign_id.is_none());
        assert!(after.expires_at.is_none());
        assert!(store
            .assignment_for_campaign("camp-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn auto_renewing_terms_survive_the_sweep() {
        let (tiers, store, _dir) = pool().await;
        let id = provision_warm(&store, "renewing@pool.example.com").await;
        tiers
            .change_tier(&id.id, id.version, BillingTier::Pro, true)
            .await
            .unwrap();

        let downgraded = tiers.run_expiry_sweep(LONG_AFTER).await.unwrap();
        assert_eq!(downgraded, 0);
        let after = store.get_identity(&id.id).await.unwrap().unwrap();
        assert_eq!(after.billing_tier, BillingTier::Pro);
    }
}
