// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Billing tier changes and the expiration sweep.

use rusqlite::params;

use kiln_core::tier::TierLimits;
use kiln_core::{KilnError, Result};

use crate::database::Database;
use crate::models::{identity_from_row, BillingTier, IdentityRecord, IDENTITY_COLUMNS};
use crate::queries::identities::fetch_identity;

/// Rewrite an identity's tier and limits. Term stamps are computed by the
/// caller so upgrades and downgrades share one write path. Counters are
/// never touched.
#[allow(clippy::too_many_arguments)]
pub async fn apply_tier(
    db: &Database,
    id: &str,
    expected_version: i64,
    tier: BillingTier,
    limits: &TierLimits,
    purchased_at: Option<&str>,
    expires_at: Option<&str>,
    auto_renew: bool,
) -> Result<IdentityRecord> {
    let id = id.to_string();
    let limits = *limits;
    let purchased_at = purchased_at.map(str::to_string);
    let expires_at = expires_at.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = fetch_identity(&tx, &id)? else {
                return Ok(Err(KilnError::NotFound { id }));
            };
            if current.version != expected_version {
                return Ok(Err(KilnError::Conflict(format!(
                    "identity `{id}` is at version {}, caller expected {expected_version}",
                    current.version
                ))));
            }
            tx.execute(
                "UPDATE identities
                 SET billing_tier = ?1,
                     daily_limit = ?2,
                     hourly_limit = ?3,
                     auto_renew = ?4,
                     purchased_at = ?5,
                     expires_at = ?6,
                     version = version + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?7",
                params![
                    tier.to_string(),
                    limits.daily_limit,
                    limits.hourly_limit,
                    auto_renew,
                    purchased_at,
                    expires_at,
                    id,
                ],
            )?;
            let updated =
                fetch_identity(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(updated))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Paid identities whose term has lapsed without auto-renew, oldest lapse
/// first. Input to the expiration sweep.
pub async fn list_lapsed(db: &Database, now: &str) -> Result<Vec<IdentityRecord>> {
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities
                 WHERE billing_tier != 'free'
                   AND auto_renew = 0
                   AND expires_at IS NOT NULL
                   AND expires_at < ?1
                 ORDER BY expires_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![now], identity_from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Downgrade one lapsed identity to the free tier, force-releasing any
/// assignment it still holds.
///
/// The `WHERE` clause re-checks the lapse so a renewal racing the sweep
/// wins; in that case the function returns `None` and the sweep moves on.
pub async fn downgrade_expired(
    db: &Database,
    id: &str,
    now: &str,
    free: &TierLimits,
) -> Result<Option<IdentityRecord>> {
    let id = id.to_string();
    let now = now.to_string();
    let free = *free;
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE identities
                 SET billing_tier = 'free',
                     daily_limit = ?1,
                     hourly_limit = ?2,
                     auto_renew = 0,
                     purchased_at = NULL,
                     expires_at = NULL,
                     assigned_campaign_id = NULL,
                     version = version + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?3
                   AND billing_tier != 'free'
                   AND auto_renew = 0
                   AND expires_at IS NOT NULL
                   AND expires_at < ?4",
                params![free.daily_limit, free.hourly_limit, id, now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            fetch_identity(conn, &id)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::identities::{create_identity, get_identity, record_send};
    use kiln_core::types::{IdentityKind, NewIdentity};
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap(), true).await.unwrap();
        (db, dir)
    }

    async fn provision_free(db: &Database, address: &str) -> IdentityRecord {
        let new = NewIdentity {
            address: address.to_string(),
            kind: IdentityKind::Domain,
            tenant_id: None,
            shared: true,
            billing_tier: BillingTier::Free,
            auto_renew: false,
        };
        create_identity(db, &new, &TierLimits::for_tier(BillingTier::Free))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upgrade_rewrites_limits_and_keeps_counters() {
        let (db, _dir) = setup_db().await;
        let r = provision_free(&db, "up.example.com").await;
        record_send(&db, &r.id).await.unwrap();

        let pro = TierLimits::for_tier(BillingTier::Pro);
        let upgraded = apply_tier(
            &db,
            &r.id,
            r.version,
            BillingTier::Pro,
            &pro,
            Some("2026-08-01T00:00:00.000Z"),
            Some("2026-08-31T00:00:00.000Z"),
            true,
        )
        .await
        .unwrap();

        assert_eq!(upgraded.billing_tier, BillingTier::Pro);
        assert_eq!(upgraded.daily_limit, 2000);
        assert_eq!(upgraded.hourly_limit, 200);
        assert!(upgraded.auto_renew);
        assert_eq!(upgraded.purchased_at.as_deref(), Some("2026-08-01T00:00:00.000Z"));
        assert_eq!(upgraded.expires_at.as_deref(), Some("2026-08-31T00:00:00.000Z"));
        assert_eq!(upgraded.version, r.version + 1);
        assert_eq!(upgraded.sent_total, 1, "upgrade must not reset counters");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn stale_version_blocks_tier_change() {
        let (db, _dir) = setup_db().await;
        let r = provision_free(&db, "stale.example.com").await;

        let err = apply_tier(
            &db,
            &r.id,
            r.version + 1,
            BillingTier::Starter,
            &TierLimits::for_tier(BillingTier::Starter),
            None,
            None,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KilnError::Conflict(_)));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn lapse_listing_skips_renewing_and_free() {
        let (db, _dir) = setup_db().await;
        let lapsed = provision_free(&db, "lapsed.example.com").await;
        let renewing = provision_free(&db, "renewing.example.com").await;
        provision_free(&db, "free.example.com").await;

        let starter = TierLimits::for_tier(BillingTier::Starter);
        apply_tier(
            &db,
            &lapsed.id,
            lapsed.version,
            BillingTier::Starter,
            &starter,
            Some("2026-06-01T00:00:00.000Z"),
            Some("2026-07-01T00:00:00.000Z"),
            false,
        )
        .await
        .unwrap();
        apply_tier(
            &db,
            &renewing.id,
            renewing.version,
            BillingTier::Starter,
            &starter,
            Some("2026-06-01T00:00:00.000Z"),
            Some("2026-07-01T00:00:00.000Z"),
            true,
        )
        .await
        .unwrap();

        let due = list_lapsed(&db, "2026-08-01T00:00:00.000Z").await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, lapsed.id);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn downgrade_force_releases_and_is_idempotent() {
        let (db, _dir) = setup_db().await;
        let r = provision_free(&db, "down.example.com").await;
        let starter = TierLimits::for_tier(BillingTier::Starter);
        let r = apply_tier(
            &db,
            &r.id,
            r.version,
            BillingTier::Starter,
            &starter,
            Some("2026-06-01T00:00:00.000Z"),
            Some("2026-07-01T00:00:00.000Z"),
            false,
        )
        .await
        .unwrap();

        // Simulate a live assignment surviving to expiry.
        let id = r.id.clone();
        db.connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE identities SET assigned_campaign_id = 'camp-1' WHERE id = ?1",
                    params![id],
                )
            })
            .await
            .unwrap();

        let now = "2026-08-01T00:00:00.000Z";
        let free = TierLimits::for_tier(BillingTier::Free);
        let downgraded = downgrade_expired(&db, &r.id, now, &free)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(downgraded.billing_tier, BillingTier::Free);
        assert_eq!(downgraded.daily_limit, 50);
        assert!(downgraded.assigned_campaign_id.is_none());
        assert!(downgraded.expires_at.is_none());
        assert!(downgraded.purchased_at.is_none());

        // Second pass finds nothing left to do.
        assert!(downgrade_expired(&db, &r.id, now, &free).await.unwrap().is_none());

        let reread = get_identity(&db, &r.id).await.unwrap().unwrap();
        assert_eq!(reread.version, downgraded.version);

        db.close().await.unwrap();
    }
}
