// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Version-guarded lifecycle mutations and the append-only transition log.
//!
//! Every mutation here runs in one transaction: load the row, check the
//! edge against the state machine, check the caller's `version`, apply the
//! update, append a log entry, commit. A stale `version` surfaces as
//! `Conflict` so callers re-read instead of clobbering a concurrent change.

use rusqlite::params;

use kiln_core::{lifecycle, KilnError, Result};

use crate::database::Database;
use crate::models::{
    identity_from_row, transition_from_row, BurnOutcome, IdentityRecord, LifecycleState,
    RotationReason, TransitionEntry, IDENTITY_COLUMNS,
};
use crate::queries::identities::fetch_identity;

fn log_transition(
    conn: &rusqlite::Connection,
    identity_id: &str,
    from: LifecycleState,
    to: LifecycleState,
    actor: &str,
    reason: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO transitions (identity_id, from_state, to_state, actor, reason)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![identity_id, from.to_string(), to.to_string(), actor, reason],
    )?;
    Ok(())
}

fn stale_version(id: &str, actual: i64, expected: i64) -> KilnError {
    KilnError::Conflict(format!(
        "identity `{id}` is at version {actual}, caller expected {expected}"
    ))
}

/// Move an identity along one legal lifecycle edge.
///
/// Leaving `warm` vacates any campaign assignment; an identity that can no
/// longer send must not stay claimed.
pub async fn transition_state(
    db: &Database,
    id: &str,
    to: LifecycleState,
    expected_version: i64,
    actor: &str,
    reason: Option<&str>,
) -> Result<IdentityRecord> {
    let id = id.to_string();
    let actor = actor.to_string();
    let reason = reason.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = fetch_identity(&tx, &id)? else {
                return Ok(Err(KilnError::NotFound { id }));
            };
            if let Err(e) = lifecycle::check(current.lifecycle_state, to) {
                return Ok(Err(e));
            }
            if current.version != expected_version {
                return Ok(Err(stale_version(&id, current.version, expected_version)));
            }
            let vacate = current.lifecycle_state == LifecycleState::Warm;
            tx.execute(
                "UPDATE identities
                 SET lifecycle_state = ?1,
                     assigned_campaign_id = CASE WHEN ?2 THEN NULL
                                                 ELSE assigned_campaign_id END,
                     version = version + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?3",
                params![to.to_string(), vacate, id],
            )?;
            log_transition(&tx, &id, current.lifecycle_state, to, &actor, reason.as_deref())?;
            let updated =
                fetch_identity(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(updated))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Put a `cold` identity on the ramp: day 1, materialized schedule, fresh
/// daily counter. Only `cold` qualifies; a `cooling` identity re-enters via
/// [`transition_state`] with its existing schedule intact.
pub async fn begin_warmup(
    db: &Database,
    id: &str,
    expected_version: i64,
    schedule_json: &str,
    first_target: i64,
    actor: &str,
) -> Result<IdentityRecord> {
    let id = id.to_string();
    let schedule_json = schedule_json.to_string();
    let actor = actor.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = fetch_identity(&tx, &id)? else {
                return Ok(Err(KilnError::NotFound { id }));
            };
            if current.lifecycle_state != LifecycleState::Cold {
                return Ok(Err(KilnError::InvalidState {
                    operation: "start_warmup",
                    expected: LifecycleState::Cold,
                    actual: current.lifecycle_state,
                }));
            }
            if current.version != expected_version {
                return Ok(Err(stale_version(&id, current.version, expected_version)));
            }
            tx.execute(
                "UPDATE identities
                 SET lifecycle_state = 'warming',
                     warmup_day = 1,
                     warmup_target = ?1,
                     warmup_schedule = ?2,
                     warmup_advanced_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                     sent_today = 0,
                     version = version + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?3",
                params![first_target, schedule_json, id],
            )?;
            log_transition(
                &tx,
                &id,
                LifecycleState::Cold,
                LifecycleState::Warming,
                &actor,
                Some("warmup ramp started"),
            )?;
            let updated =
                fetch_identity(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(updated))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Step a `warming` identity to the given day and target from its
/// materialized schedule. Resets `sent_today` for the new day's budget.
pub async fn advance_warmup(
    db: &Database,
    id: &str,
    expected_version: i64,
    day: i64,
    target: i64,
) -> Result<IdentityRecord> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = fetch_identity(&tx, &id)? else {
                return Ok(Err(KilnError::NotFound { id }));
            };
            if current.lifecycle_state != LifecycleState::Warming {
                return Ok(Err(KilnError::InvalidState {
                    operation: "advance_warmup",
                    expected: LifecycleState::Warming,
                    actual: current.lifecycle_state,
                }));
            }
            if current.version != expected_version {
                return Ok(Err(stale_version(&id, current.version, expected_version)));
            }
            tx.execute(
                "UPDATE identities
                 SET warmup_day = ?1,
                     warmup_target = ?2,
                     warmup_advanced_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                     sent_today = 0,
                     version = version + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?3",
                params![day, target, id],
            )?;
            let updated =
                fetch_identity(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(updated))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Graduate a `warming` identity that has finished its final scheduled day.
pub async fn complete_warmup(
    db: &Database,
    id: &str,
    expected_version: i64,
    actor: &str,
) -> Result<IdentityRecord> {
    let id = id.to_string();
    let actor = actor.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = fetch_identity(&tx, &id)? else {
                return Ok(Err(KilnError::NotFound { id }));
            };
            if let Err(e) = lifecycle::check(current.lifecycle_state, LifecycleState::Warm) {
                return Ok(Err(e));
            }
            if current.version != expected_version {
                return Ok(Err(stale_version(&id, current.version, expected_version)));
            }
            tx.execute(
                "UPDATE identities
                 SET lifecycle_state = 'warm',
                     warmup_completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                     warmup_advanced_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                     version = version + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id],
            )?;
            log_transition(
                &tx,
                &id,
                current.lifecycle_state,
                LifecycleState::Warm,
                &actor,
                Some("warmup ramp completed"),
            )?;
            let updated =
                fetch_identity(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(updated))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Warming identities whose last advancement predates `today` (UTC date
/// string). Freshly started ramps carry today's stamp and are skipped.
pub async fn list_due_warmups(db: &Database, today: &str) -> Result<Vec<IdentityRecord>> {
    let today = today.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities
                 WHERE lifecycle_state = 'warming'
                   AND (warmup_advanced_at IS NULL
                        OR substr(warmup_advanced_at, 1, 10) < ?1)
                 ORDER BY warmup_day DESC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![today], identity_from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Burn an identity and capture the campaign it vacates.
///
/// Burning an already-burned identity is idempotent: the assignment is
/// vacated if one somehow survived, existing rotation stamps are kept, and
/// no new log entry or version bump is produced.
pub async fn burn_identity(
    db: &Database,
    id: &str,
    expected_version: i64,
    reason: RotationReason,
    actor: &str,
) -> Result<BurnOutcome> {
    let id = id.to_string();
    let actor = actor.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = fetch_identity(&tx, &id)? else {
                return Ok(Err(KilnError::NotFound { id }));
            };
            let vacated = current.assigned_campaign_id.clone();

            if current.lifecycle_state == LifecycleState::Burned {
                tx.execute(
                    "UPDATE identities
                     SET assigned_campaign_id = NULL,
                         rotated_at = COALESCE(rotated_at,
                                               strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                         rotation_reason = COALESCE(rotation_reason, ?1),
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?2",
                    params![reason.to_string(), id],
                )?;
                let updated =
                    fetch_identity(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                tx.commit()?;
                return Ok(Ok(BurnOutcome {
                    identity: updated,
                    vacated_campaign: vacated,
                }));
            }

            if let Err(e) = lifecycle::check(current.lifecycle_state, LifecycleState::Burned) {
                return Ok(Err(e));
            }
            if current.version != expected_version {
                return Ok(Err(stale_version(&id, current.version, expected_version)));
            }
            tx.execute(
                "UPDATE identities
                 SET lifecycle_state = 'burned',
                     assigned_campaign_id = NULL,
                     rotated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                     rotation_reason = ?1,
                     version = version + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?2",
                params![reason.to_string(), id],
            )?;
            log_transition(
                &tx,
                &id,
                current.lifecycle_state,
                LifecycleState::Burned,
                &actor,
                Some(&reason.to_string()),
            )?;
            let updated =
                fetch_identity(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Ok(BurnOutcome {
                identity: updated,
                vacated_campaign: vacated,
            }))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Most recent transition log entries for one identity, newest first.
pub async fn transitions_for(
    db: &Database,
    identity_id: &str,
    limit: i64,
) -> Result<Vec<TransitionEntry>> {
    let identity_id = identity_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, identity_id, from_state, to_state, actor, reason, created_at
                 FROM transitions WHERE identity_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![identity_id, limit], transition_from_row)?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
