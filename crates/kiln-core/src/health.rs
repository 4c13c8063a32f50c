// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health grading and rotation policy.
//!
//! Evaluation is a pure function over the counters already on the record,
//! so it can run inline after a delivery event or in bulk from the hourly
//! sweep and give the same verdict either way. Domains carry stricter
//! thresholds than mailboxes because one domain aggregates the traffic of
//! every mailbox under it.

use serde::{Deserialize, Serialize};

use crate::types::{HealthStatus, IdentityKind, IdentityRecord, RotationReason, SendEvent};

/// Reputation floor below which an identity is rotated out.
pub const ROTATE_REPUTATION_FLOOR: f64 = 0.70;
/// Spam-complaint rate ceiling for mailboxes.
pub const ROTATE_SPAM_RATE_MAILBOX: f64 = 0.01;
/// Spam-complaint rate ceiling for domains.
pub const ROTATE_SPAM_RATE_DOMAIN: f64 = 0.001;
/// Bounce rate ceiling for domains.
pub const ROTATE_BOUNCE_RATE_DOMAIN: f64 = 0.05;
/// Bounce rate ceiling for mailboxes.
pub const ROTATE_BOUNCE_RATE_MAILBOX: f64 = 0.10;
/// Absolute complaint ceiling for a single mailbox.
pub const ROTATE_COMPLAINTS_MAILBOX: i64 = 5;

const EXCELLENT_BOUNCE: f64 = 0.02;
const EXCELLENT_SPAM: f64 = 0.001;
const GOOD_BOUNCE: f64 = 0.05;
const GOOD_SPAM: f64 = 0.005;
const FAIR_BOUNCE: f64 = 0.10;
const FAIR_SPAM: f64 = 0.01;

/// Outcome of one health evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub bounce_rate: f64,
    pub spam_rate: f64,
    pub reply_rate: f64,
    /// `1.0 - bounce_rate - spam_rate`, clamped to `[0, 1]`.
    pub deliverability_score: f64,
    /// First rotation trigger that fired, in priority order, or `None` when
    /// the identity may keep sending.
    pub rotation: Option<RotationReason>,
}

/// Grade an identity from its lifetime counters and reputation.
///
/// An identity that trips a rotation trigger grades `poor` regardless of
/// the rate bands.
pub fn evaluate(identity: &IdentityRecord) -> HealthReport {
    let sent = identity.sent_total.max(1) as f64;
    let bounce_rate = identity.bounces as f64 / sent;
    let spam_rate = identity.spam_complaints as f64 / sent;
    let reply_rate = identity.replies_received as f64 / sent;

    let rotation = rotation_trigger(identity, bounce_rate, spam_rate);
    let status = match rotation {
        Some(_) => HealthStatus::Poor,
        None => grade(bounce_rate, spam_rate),
    };

    HealthReport {
        status,
        bounce_rate,
        spam_rate,
        reply_rate,
        deliverability_score: (1.0 - bounce_rate - spam_rate).clamp(0.0, 1.0),
        rotation,
    }
}

fn grade(bounce_rate: f64, spam_rate: f64) -> HealthStatus {
    if bounce_rate < EXCELLENT_BOUNCE && spam_rate < EXCELLENT_SPAM {
        HealthStatus::Excellent
    } else if bounce_rate < GOOD_BOUNCE && spam_rate < GOOD_SPAM {
        HealthStatus::Good
    } else if bounce_rate < FAIR_BOUNCE && spam_rate < FAIR_SPAM {
        HealthStatus::Fair
    } else {
        HealthStatus::Poor
    }
}

/// Rotation triggers in priority order. Reputation wins over the rate
/// triggers so the stored reason names the strongest signal.
fn rotation_trigger(
    identity: &IdentityRecord,
    bounce_rate: f64,
    spam_rate: f64,
) -> Option<RotationReason> {
    if identity.reputation_score < ROTATE_REPUTATION_FLOOR {
        return Some(RotationReason::ReputationBelowThreshold);
    }
    let spam_ceiling = match identity.kind {
        IdentityKind::Mailbox => ROTATE_SPAM_RATE_MAILBOX,
        IdentityKind::Domain => ROTATE_SPAM_RATE_DOMAIN,
    };
    if spam_rate > spam_ceiling {
        return Some(RotationReason::HighSpamComplaints);
    }
    let bounce_ceiling = match identity.kind {
        IdentityKind::Mailbox => ROTATE_BOUNCE_RATE_MAILBOX,
        IdentityKind::Domain => ROTATE_BOUNCE_RATE_DOMAIN,
    };
    if bounce_rate > bounce_ceiling {
        return Some(RotationReason::HighBounceRate);
    }
    if identity.kind == IdentityKind::Mailbox
        && identity.spam_complaints > ROTATE_COMPLAINTS_MAILBOX
    {
        return Some(RotationReason::SpamComplaintThreshold);
    }
    None
}

/// Reputation adjustment applied when a delivery event arrives. Positive
/// events recover reputation slowly; negative events cut it fast.
pub fn reputation_delta(event: SendEvent) -> f64 {
    match event {
        SendEvent::Delivered => 0.001,
        SendEvent::Reply => 0.005,
        SendEvent::BouncedSoft => -0.005,
        SendEvent::BouncedHard => -0.02,
        SendEvent::SpamComplaint => -0.05,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_iso8601, BillingTier, LifecycleState};

    fn identity(kind: IdentityKind) -> IdentityRecord {
        IdentityRecord {
            id: "id-1".to_string(),
            address: "sender.example.com".to_string(),
            kind,
            tenant_id: None,
            shared: false,
            lifecycle_state: LifecycleState::Warm,
            reputation_score: 1.0,
            deliverability_score: 1.0,
            health_status: None,
            sent_today: 0,
            sent_total: 1000,
            bounces: 0,
            spam_complaints: 0,
            replies_received: 0,
            warmup_day: 0,
            warmup_target: 0,
            warmup_schedule: None,
            warmup_completed_at: None,
            warmup_advanced_at: None,
            billing_tier: BillingTier::Pro,
            daily_limit: 2000,
            hourly_limit: 200,
            auto_renew: false,
            purchased_at: None,
            expires_at: None,
            assigned_campaign_id: None,
            last_used_at: None,
            last_health_check_at: None,
            rotated_at: None,
            rotation_reason: None,
            version: 1,
            created_at: now_iso8601(),
            updated_at: now_iso8601(),
        }
    }

    #[test]
    fn zero_traffic_grades_excellent_without_division_by_zero() {
        let mut id = identity(IdentityKind::Mailbox);
        id.sent_total = 0;
        let report = evaluate(&id);
        assert_eq!(report.status, HealthStatus::Excellent);
        assert_eq!(report.bounce_rate, 0.0);
        assert_eq!(report.deliverability_score, 1.0);
        assert_eq!(report.rotation, None);
    }

    #[test]
    fn grading_bands_take_the_worse_of_both_rates() {
        let mut id = identity(IdentityKind::Mailbox);
        id.bounces = 10; // 1%
        assert_eq!(evaluate(&id).status, HealthStatus::Excellent);

        id.bounces = 30; // 3%
        assert_eq!(evaluate(&id).status, HealthStatus::Good);

        id.bounces = 10;
        id.spam_complaints = 3; // 0.3% spam drags excellent down to good
        assert_eq!(evaluate(&id).status, HealthStatus::Good);

        id.bounces = 70; // 7%
        id.spam_complaints = 0;
        assert_eq!(evaluate(&id).status, HealthStatus::Fair);

        id.bounces = 120; // 12%
        assert_eq!(evaluate(&id).status, HealthStatus::Poor);
    }

    #[test]
    fn six_percent_bounce_rotates_a_domain_but_not_a_mailbox() {
        let mut domain = identity(IdentityKind::Domain);
        domain.bounces = 60;
        let report = evaluate(&domain);
        assert_eq!(report.bounce_rate, 0.06);
        assert_eq!(report.rotation, Some(RotationReason::HighBounceRate));

        let mut mailbox = identity(IdentityKind::Mailbox);
        mailbox.bounces = 60;
        assert_eq!(evaluate(&mailbox).rotation, None);
    }

    #[test]
    fn rotation_bound_identities_grade_poor() {
        // 6% bounce sits in the fair band for the generic grades, but a
        // domain at that rate is rotation-bound and must report poor.
        let mut domain = identity(IdentityKind::Domain);
        domain.bounces = 60;
        let report = evaluate(&domain);
        assert_eq!(report.rotation, Some(RotationReason::HighBounceRate));
        assert_eq!(report.status, HealthStatus::Poor);
    }

    #[test]
    fn spam_rate_thresholds_differ_by_kind() {
        // 0.2% complaints: above the domain ceiling, below the mailbox one.
        let mut domain = identity(IdentityKind::Domain);
        domain.spam_complaints = 2;
        assert_eq!(
            evaluate(&domain).rotation,
            Some(RotationReason::HighSpamComplaints)
        );

        let mut mailbox = identity(IdentityKind::Mailbox);
        mailbox.spam_complaints = 2;
        assert_eq!(evaluate(&mailbox).rotation, None);
    }

    #[test]
    fn reputation_floor_outranks_rate_triggers() {
        let mut id = identity(IdentityKind::Domain);
        id.reputation_score = 0.5;
        id.bounces = 200; // would also trip the bounce trigger
        assert_eq!(
            evaluate(&id).rotation,
            Some(RotationReason::ReputationBelowThreshold)
        );
    }

    #[test]
    fn absolute_complaint_count_rotates_low_volume_mailboxes() {
        // Six complaints on heavy volume: rate triggers stay quiet but the
        // absolute ceiling still fires.
        let mut mailbox = identity(IdentityKind::Mailbox);
        mailbox.sent_total = 10_000;
        mailbox.spam_complaints = 6;
        assert_eq!(
            evaluate(&mailbox).rotation,
            Some(RotationReason::SpamComplaintThreshold)
        );

        mailbox.spam_complaints = 5;
        assert_eq!(evaluate(&mailbox).rotation, None);
    }

    #[test]
    fn thresholds_are_exclusive_at_the_boundary() {
        let mut domain = identity(IdentityKind::Domain);
        domain.bounces = 50; // exactly 5%
        assert_eq!(evaluate(&domain).rotation, None);
        domain.bounces = 51;
        assert_eq!(
            evaluate(&domain).rotation,
            Some(RotationReason::HighBounceRate)
        );
    }

    #[test]
    fn deliverability_clamps_to_zero() {
        let mut id = identity(IdentityKind::Mailbox);
        id.sent_total = 10;
        id.bounces = 9;
        id.spam_complaints = 8;
        let report = evaluate(&id);
        assert_eq!(report.deliverability_score, 0.0);
    }

    #[test]
    fn reputation_deltas_are_signed_as_expected() {
        assert!(reputation_delta(SendEvent::Delivered) > 0.0);
        assert!(reputation_delta(SendEvent::Reply) > reputation_delta(SendEvent::Delivered));
        assert!(reputation_delta(SendEvent::BouncedSoft) < 0.0);
        assert!(reputation_delta(SendEvent::BouncedHard) < reputation_delta(SendEvent::BouncedSoft));
        assert!(reputation_delta(SendEvent::SpamComplaint) < reputation_delta(SendEvent::BouncedHard));
    }
}
