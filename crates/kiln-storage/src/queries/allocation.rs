// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign assignment: candidate discovery, atomic claims, release, and
//! replacement search for rotation.
//!
//! A claim is a single conditional `UPDATE` re-checking assignability in
//! its `WHERE` clause, so two racing callers can never hold the same
//! identity; the loser sees zero changed rows and moves to its next
//! candidate. The `'active'` spelling appears alongside `'warm'` in state
//! filters because legacy imports used it for warm domains.

use rusqlite::params;

use kiln_core::{KilnError, Result};

use crate::database::Database;
use crate::models::{identity_from_row, IdentityRecord, IDENTITY_COLUMNS};
use crate::queries::identities::fetch_identity;

const TENANT_VISIBLE: &str =
    "(tenant_id IS NULL OR shared = 1 OR (?1 IS NOT NULL AND tenant_id = ?1))";

/// The identity currently serving a campaign, if any. Assignment is
/// exclusive, so at most one row can match.
pub async fn assignment_for_campaign(
    db: &Database,
    campaign_id: &str,
) -> Result<Option<IdentityRecord>> {
    let campaign_id = campaign_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities
                 WHERE assigned_campaign_id = ?1 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            match stmt.query_row(params![campaign_id], identity_from_row) {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Assignable identities visible to the tenant, best first.
///
/// Ordering is the volume-per-problem proxy descending, then least
/// recently used, then id for a stable order under ties.
pub async fn allocation_candidates(
    db: &Database,
    tenant_id: Option<&str>,
    limit: i64,
) -> Result<Vec<IdentityRecord>> {
    let tenant_id = tenant_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities
                 WHERE lifecycle_state IN ('warm', 'active')
                   AND assigned_campaign_id IS NULL
                   AND sent_today < daily_limit
                   AND {TENANT_VISIBLE}
                 ORDER BY CAST(sent_total AS REAL) / (bounces + spam_complaints + 1) DESC,
                          COALESCE(last_used_at, '') ASC,
                          id ASC
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![tenant_id, limit], identity_from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Try to claim an identity for a campaign. Returns `false` when the row
/// was no longer assignable, which a racing allocator treats as "next
/// candidate", not an error.
pub async fn claim_identity(db: &Database, id: &str, campaign_id: &str) -> Result<bool> {
    let id = id.to_string();
    let campaign_id = campaign_id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE identities
                 SET assigned_campaign_id = ?1,
                     last_used_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                     version = version + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?2
                   AND lifecycle_state IN ('warm', 'active')
                   AND assigned_campaign_id IS NULL
                   AND sent_today < daily_limit",
                params![campaign_id, id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Hand an identity back to the pool. Idempotent: releasing an unassigned
/// identity changes nothing and does not bump `version`.
pub async fn release_identity(db: &Database, id: &str) -> Result<IdentityRecord> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = fetch_identity(&tx, &id)? else {
                return Ok(Err(KilnError::NotFound { id }));
            };
            if current.assigned_campaign_id.is_none() {
                tx.commit()?;
                return Ok(Ok(current));
            }
            tx.execute(
                "UPDATE identities
                 SET assigned_campaign_id = NULL,
                     version = version + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id],
            )?;
            let updated =
                fetch_identity(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(updated))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Best replacement for a burned identity: assignable, visible to the same
/// tenant, highest reputation first. Never returns `cooling` or otherwise
/// non-assignable rows.
pub async fn find_replacement(
    db: &Database,
    tenant_id: Option<&str>,
) -> Result<Option<IdentityRecord>> {
    let tenant_id = tenant_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities
                 WHERE lifecycle_state IN ('warm', 'active')
                   AND assigned_campaign_id IS NULL
                   AND sent_today < daily_limit
                   AND {TENANT_VISIBLE}
                 ORDER BY reputation_score DESC,
                          COALESCE(last_used_at, '') ASC,
                          id ASC
                 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            match stmt.query_row(params![tenant_id], identity_from_row) {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::identities::{create_identity, get_identity};
    use crate::queries::lifecycle::transition_state;
    use kiln_core::tier::TierLimits;
    use kiln_core::types::{BillingTier, IdentityKind, LifecycleState, NewIdentity};
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap(), true).await.unwrap();
        (db, dir)
    }

    async fn provision_warm(
        db: &Database,
        address: &str,
        tenant_id: Option<&str>,
        shared: bool,
    ) -> IdentityRecord {
        let new = NewIdentity {
            address: address.to_string(),
            kind: IdentityKind::Mailbox,
            tenant_id: tenant_id.map(str::to_string),
            shared,
            billing_tier: BillingTier::Free,
            auto_renew: false,
        };
        let r = create_identity(db, &new, &TierLimits::for_tier(BillingTier::Free))
            .await
            .unwrap();
        let r = transition_state(db, &r.id, LifecycleState::Warming, r.version, "test", None)
            .await
            .unwrap();
        transition_state(db, &r.id, LifecycleState::Warm, r.version, "test", None)
            .await
            .unwrap()
    }

    async fn set_counters(db: &Database, id: &str, sent_total: i64, bounces: i64) {
        let id = id.to_string();
        db.connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE identities SET sent_total = ?1, bounces = ?2 WHERE id = ?3",
                    params![sent_total, bounces, id],
                )
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn candidates_rank_by_volume_per_problem() {
        let (db, _dir) = setup_db().await;
        let a = provision_warm(&db, "a@x.example.com", None, true).await;
        let b = provision_warm(&db, "b@x.example.com", None, true).await;
        let c = provision_warm(&db, "c@x.example.com", None, true).await;
        // a: 900 / (2+1) = 300, b: 500 / 1 = 500, c: 100 / 1 = 100.
        set_counters(&db, &a.id, 900, 2).await;
        set_counters(&db, &b.id, 500, 0).await;
        set_counters(&db, &c.id, 100, 0).await;

        let got = allocation_candidates(&db, None, 10).await.unwrap();
        let ids: Vec<&str> = got.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str(), c.id.as_str()]);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn candidates_respect_tenant_visibility() {
        let (db, _dir) = setup_db().await;
        let pool = provision_warm(&db, "shared@x.example.com", None, true).await;
        let owned = provision_warm(&db, "owned@x.example.com", Some("t-1"), false).await;
        provision_warm(&db, "other@x.example.com", Some("t-2"), false).await;

        let anon = allocation_candidates(&db, None, 10).await.unwrap();
        assert_eq!(anon.len(), 1);
        assert_eq!(anon[0].id, pool.id);

        let tenant = allocation_candidates(&db, Some("t-1"), 10).await.unwrap();
        let ids: Vec<&str> = tenant.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&pool.id.as_str()));
        assert!(ids.contains(&owned.id.as_str()));
        assert_eq!(ids.len(), 2);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_checks_capacity() {
        let (db, _dir) = setup_db().await;
        let r = provision_warm(&db, "claim@x.example.com", None, true).await;

        assert!(claim_identity(&db, &r.id, "camp-1").await.unwrap());
        assert!(
            !claim_identity(&db, &r.id, "camp-2").await.unwrap(),
            "second claim must lose"
        );

        let held = get_identity(&db, &r.id).await.unwrap().unwrap();
        assert_eq!(held.assigned_campaign_id.as_deref(), Some("camp-1"));
        assert_eq!(held.version, r.version + 1);
        assert!(held.last_used_at.is_some());

        // At the daily cap the row is no longer claimable even once freed.
        release_identity(&db, &r.id).await.unwrap();
        let id = r.id.clone();
        db.connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE identities SET sent_today = daily_limit WHERE id = ?1",
                    params![id],
                )
            })
            .await
            .unwrap();
        assert!(!claim_identity(&db, &r.id, "camp-3").await.unwrap());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (db, _dir) = setup_db().await;
        let r = provision_warm(&db, "release@x.example.com", None, true).await;
        assert!(claim_identity(&db, &r.id, "camp-1").await.unwrap());

        let freed = release_identity(&db, &r.id).await.unwrap();
        assert!(freed.assigned_campaign_id.is_none());

        let again = release_identity(&db, &r.id).await.unwrap();
        assert_eq!(again.version, freed.version, "no-op release must not bump version");

        let err = release_identity(&db, "ghost").await.unwrap_err();
        assert!(matches!(err, KilnError::NotFound { .. }));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn assignment_lookup_finds_the_holder() {
        let (db, _dir) = setup_db().await;
        let r = provision_warm(&db, "holder@x.example.com", None, true).await;
        assert!(assignment_for_campaign(&db, "camp-1").await.unwrap().is_none());

        claim_identity(&db, &r.id, "camp-1").await.unwrap();
        let held = assignment_for_campaign(&db, "camp-1").await.unwrap().unwrap();
        assert_eq!(held.id, r.id);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn replacement_prefers_reputation_and_skips_unassignable() {
        let (db, _dir) = setup_db().await;
        let low = provision_warm(&db, "low@x.example.com", None, true).await;
        let high = provision_warm(&db, "high@x.example.com", None, true).await;
        let busy = provision_warm(&db, "busy@x.example.com", None, true).await;
        claim_identity(&db, &busy.id, "camp-1").await.unwrap();

        for (id, score) in [(&low.id, 0.75_f64), (&high.id, 0.97), (&busy.id, 0.99)] {
            let id = id.clone();
            db.connection()
                .call(move |conn| {
                    conn.execute(
                        "UPDATE identities SET reputation_score = ?1 WHERE id = ?2",
                        params![score, id],
                    )
                })
                .await
                .unwrap();
        }

        let pick = find_replacement(&db, None).await.unwrap().unwrap();
        assert_eq!(pick.id, high.id, "assigned rows must be skipped despite reputation");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn replacement_never_returns_cooling() {
        let (db, _dir) = setup_db().await;
        let r = provision_warm(&db, "cool@x.example.com", None, true).await;
        transition_state(&db, &r.id, LifecycleState::Cooling, r.version, "test", None)
            .await
            .unwrap();

        assert!(find_replacement(&db, None).await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn legacy_active_rows_are_claimable() {
        let (db, _dir) = setup_db().await;
        let r = provision_warm(&db, "legacy@x.example.com", None, true).await;
        let id = r.id.clone();
        db.connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE identities SET lifecycle_state = 'active' WHERE id = ?1",
                    params![id],
                )
            })
            .await
            .unwrap();

        let candidates = allocation_candidates(&db, None, 10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].lifecycle_state, LifecycleState::Warm);
        assert!(claim_identity(&db, &r.id, "camp-1").await.unwrap());

        db.close().await.unwrap();
    }
}
