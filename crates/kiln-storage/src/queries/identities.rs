// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provisioning, reads, and counter updates on the `identities` table.

use rusqlite::params;

use kiln_core::tier::{TierLimits, TERM_DAYS};
use kiln_core::{KilnError, Result};

use crate::database::Database;
use crate::models::{
    identity_from_row, HealthStatus, IdentityRecord, LifecycleState, NewIdentity,
    IDENTITY_COLUMNS,
};

/// Read one identity inside an open connection or transaction. Shared by
/// every guarded mutation in the sibling query modules.
pub(crate) fn fetch_identity(
    conn: &rusqlite::Connection,
    id: &str,
) -> rusqlite::Result<Option<IdentityRecord>> {
    let sql = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    match stmt.query_row(params![id], identity_from_row) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Insert a new cold identity. Paid tiers get their term stamped from the
/// moment of provisioning; the free tier never expires.
pub async fn create_identity(
    db: &Database,
    new: &NewIdentity,
    limits: &TierLimits,
) -> Result<IdentityRecord> {
    let id = uuid::Uuid::new_v4().to_string();
    let new = new.clone();
    let limits = *limits;

    let (purchased_at, expires_at) = if limits.monthly_price_usd == 0 {
        (None, None)
    } else {
        let now = chrono::Utc::now();
        let until = now + chrono::Duration::days(TERM_DAYS);
        (
            Some(kiln_core::types::iso8601(now)),
            Some(kiln_core::types::iso8601(until)),
        )
    };

    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO identities
                     (id, address, kind, tenant_id, shared, billing_tier,
                      daily_limit, hourly_limit, auto_renew, purchased_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id,
                    new.address,
                    new.kind.to_string(),
                    new.tenant_id,
                    new.shared,
                    new.billing_tier.to_string(),
                    limits.daily_limit,
                    limits.hourly_limit,
                    new.auto_renew,
                    purchased_at,
                    expires_at,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(f, _))
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Ok(Err(KilnError::Conflict(format!(
                        "address `{}` is already in the pool",
                        new.address
                    ))));
                }
                Err(e) => return Err(e),
            }
            let record = fetch_identity(conn, &id)?.ok_or_else(|| {
                rusqlite::Error::QueryReturnedNoRows
            })?;
            Ok(Ok(record))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Get an identity by id.
pub async fn get_identity(db: &Database, id: &str) -> Result<Option<IdentityRecord>> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| fetch_identity(conn, &id))
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get an identity by its unique address.
pub async fn get_identity_by_address(
    db: &Database,
    address: &str,
) -> Result<Option<IdentityRecord>> {
    let address = address.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE address = ?1");
            let mut stmt = conn.prepare(&sql)?;
            match stmt.query_row(params![address], identity_from_row) {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List identities, optionally filtered to one lifecycle state, newest
/// first. Filtering on `warm` also matches rows imported under the legacy
/// `active` spelling.
pub async fn list_identities(
    db: &Database,
    state: Option<LifecycleState>,
) -> Result<Vec<IdentityRecord>> {
    db.connection()
        .call(move |conn| {
            let mut records = Vec::new();
            match state {
                Some(state) => {
                    let sql = format!(
                        "SELECT {IDENTITY_COLUMNS} FROM identities
                         WHERE (lifecycle_state = ?1
                                OR (?1 = 'warm' AND lifecycle_state = 'active'))
                         ORDER BY created_at DESC, id DESC"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params![state.to_string()], identity_from_row)?;
                    for row in rows {
                        records.push(row?);
                    }
                }
                None => {
                    let sql = format!(
                        "SELECT {IDENTITY_COLUMNS} FROM identities
                         ORDER BY created_at DESC, id DESC"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map([], identity_from_row)?;
                    for row in rows {
                        records.push(row?);
                    }
                }
            }
            Ok(records)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Count one send attempt: `sent_today` and `sent_total` rise together and
/// `last_used_at` moves to now. Leaves `version` alone so optimistic state
/// mutations are not invalidated by routine traffic.
pub async fn record_send(db: &Database, id: &str) -> Result<()> {
    bump_counters(db, id, "sent_today = sent_today + 1, sent_total = sent_total + 1, last_used_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')").await
}

/// Count one bounce.
pub async fn record_bounce(db: &Database, id: &str) -> Result<()> {
    bump_counters(db, id, "bounces = bounces + 1").await
}

/// Count one spam complaint.
pub async fn record_spam_complaint(db: &Database, id: &str) -> Result<()> {
    bump_counters(db, id, "spam_complaints = spam_complaints + 1").await
}

/// Count one positive reply.
pub async fn record_reply(db: &Database, id: &str) -> Result<()> {
    bump_counters(db, id, "replies_received = replies_received + 1").await
}

async fn bump_counters(db: &Database, id: &str, set_clause: &'static str) -> Result<()> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE identities
                     SET {set_clause}, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1"
                ),
                params![id],
            )?;
            if changed == 0 {
                return Ok(Err(KilnError::NotFound { id }));
            }
            Ok(Ok(()))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Apply a signed reputation delta, clamped to `[0, 1]`. Returns the new
/// score.
pub async fn adjust_reputation(db: &Database, id: &str, delta: f64) -> Result<f64> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE identities
                 SET reputation_score = MAX(0.0, MIN(1.0, reputation_score + ?1)),
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?2",
                params![delta, id],
            )?;
            if changed == 0 {
                return Ok(Err(KilnError::NotFound { id }));
            }
            let score: f64 = conn.query_row(
                "SELECT reputation_score FROM identities WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(Ok(score))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Cache the result of a health evaluation on the record.
pub async fn stamp_health(
    db: &Database,
    id: &str,
    status: HealthStatus,
    deliverability: f64,
) -> Result<()> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE identities
                 SET health_status = ?1,
                     deliverability_score = ?2,
                     last_health_check_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?3",
                params![status.to_string(), deliverability, id],
            )?;
            if changed == 0 {
                return Ok(Err(KilnError::NotFound { id }));
            }
            Ok(Ok(()))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Zero `sent_today` across the whole pool. Returns rows touched, so a
/// no-op rerun reports zero.
pub async fn reset_daily_counters(db: &Database) -> Result<u64> {
    db.connection()
        .call(|conn| {
            let changed = conn.execute(
                "UPDATE identities
                 SET sent_today = 0, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE sent_today != 0",
                [],
            )?;
            Ok(changed as u64)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Identities the scheduled health sweep looks at, least recently checked
/// first. `active` is the legacy import spelling of `warm`.
pub async fn sweep_candidates(db: &Database) -> Result<Vec<IdentityRecord>> {
    db.connection()
        .call(|conn| {
            let sql = format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities
                 WHERE lifecycle_state IN ('warm', 'active', 'warming')
                 ORDER BY COALESCE(last_health_check_at, '') ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], identity_from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
