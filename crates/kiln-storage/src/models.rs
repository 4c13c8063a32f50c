// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage-side model plumbing.
//!
//! The canonical record types live in `kiln-core::types` so they can cross
//! the [`kiln_core::IdentityStore`] trait boundary; this module re-exports
//! them and owns the row-to-record mapping shared by every query module.

use std::str::FromStr;

pub use kiln_core::types::{
    BillingTier, BurnOutcome, FollowupItem, FollowupStatus, HealthStatus, IdentityKind,
    IdentityRecord, LifecycleState, NewIdentity, RotationReason, TransitionEntry,
};

/// Column list matching [`identity_from_row`]. Keep the two in sync.
pub(crate) const IDENTITY_COLUMNS: &str = "id, address, kind, tenant_id, shared, \
     lifecycle_state, reputation_score, deliverability_score, health_status, \
     sent_today, sent_total, bounces, spam_complaints, replies_received, \
     warmup_day, warmup_target, warmup_schedule, warmup_completed_at, warmup_advanced_at, \
     billing_tier, daily_limit, hourly_limit, auto_renew, purchased_at, expires_at, \
     assigned_campaign_id, last_used_at, last_health_check_at, rotated_at, rotation_reason, \
     version, created_at, updated_at";

/// Parse a TEXT column into a strum-backed enum, reporting the column
/// index on failure so the offending row is identifiable.
pub(crate) fn parse_enum<T: FromStr>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse::<T>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognized value `{raw}`").into(),
        )
    })
}

/// Lifecycle state parser that tolerates the legacy spelling: older
/// exports store fully warmed identities as 'active'.
pub(crate) fn parse_state(idx: usize, raw: &str) -> rusqlite::Result<LifecycleState> {
    if raw == "active" {
        return Ok(LifecycleState::Warm);
    }
    parse_enum(idx, raw)
}

/// Map one `identities` row (selected via [`IDENTITY_COLUMNS`]) to a record.
pub(crate) fn identity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityRecord> {
    let kind: String = row.get(2)?;
    let state: String = row.get(5)?;
    let health: Option<String> = row.get(8)?;
    let tier: String = row.get(19)?;
    let reason: Option<String> = row.get(29)?;

    Ok(IdentityRecord {
        id: row.get(0)?,
        address: row.get(1)?,
        kind: parse_enum(2, &kind)?,
        tenant_id: row.get(3)?,
        shared: row.get(4)?,
        lifecycle_state: parse_state(5, &state)?,
        reputation_score: row.get(6)?,
        deliverability_score: row.get(7)?,
        health_status: health.as_deref().map(|h| parse_enum(8, h)).transpose()?,
        sent_today: row.get(9)?,
        sent_total: row.get(10)?,
        bounces: row.get(11)?,
        spam_complaints: row.get(12)?,
        replies_received: row.get(13)?,
        warmup_day: row.get(14)?,
        warmup_target: row.get(15)?,
        warmup_schedule: row.get(16)?,
        warmup_completed_at: row.get(17)?,
        warmup_advanced_at: row.get(18)?,
        billing_tier: parse_enum(19, &tier)?,
        daily_limit: row.get(20)?,
        hourly_limit: row.get(21)?,
        auto_renew: row.get(22)?,
        purchased_at: row.get(23)?,
        expires_at: row.get(24)?,
        assigned_campaign_id: row.get(25)?,
        last_used_at: row.get(26)?,
        last_health_check_at: row.get(27)?,
        rotated_at: row.get(28)?,
        rotation_reason: reason.as_deref().map(|r| parse_enum(29, r)).transpose()?,
        version: row.get(30)?,
        created_at: row.get(31)?,
        updated_at: row.get(32)?,
    })
}

/// Map one `followups` row in its natural column order.
pub(crate) fn followup_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FollowupItem> {
    let status: String = row.get(1)?;
    Ok(FollowupItem {
        id: row.get(0)?,
        status: parse_enum(1, &status)?,
        priority: row.get(2)?,
        payload: row.get(3)?,
        attempts: row.get(4)?,
        max_attempts: row.get(5)?,
        locked_until: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Map one `transitions` row in its natural column order.
pub(crate) fn transition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransitionEntry> {
    let from_state: String = row.get(2)?;
    let to_state: String = row.get(3)?;
    Ok(TransitionEntry {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        from_state: parse_state(2, &from_state)?,
        to_state: parse_state(3, &to_state)?,
        actor: row.get(4)?,
        reason: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_active_maps_to_warm() {
        assert_eq!(parse_state(0, "active").unwrap(), LifecycleState::Warm);
        assert_eq!(parse_state(0, "warm").unwrap(), LifecycleState::Warm);
        assert_eq!(parse_state(0, "cooling").unwrap(), LifecycleState::Cooling);
        assert!(parse_state(0, "molten").is_err());
    }

    #[test]
    fn parse_enum_reports_offending_value() {
        let err = parse_enum::<IdentityKind>(2, "pigeon").unwrap_err();
        assert!(err.to_string().contains("pigeon"));
    }
}
