// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health checking with synchronous rotation.
//!
//! Grading is pure policy in `kiln-core`; this service stamps the verdict
//! on the record and, when a trigger fires, burns the identity under the
//! version guard and rotates it on the spot. A version conflict means the
//! row moved under our read (usually a concurrent claim), so the checker
//! re-reads and re-judges once instead of overwriting someone else's
//! update; a row that keeps moving waits for the next sweep.

use std::sync::Arc;

use kiln_core::error::{KilnError, Result};
use kiln_core::health::{self, HealthReport};
use kiln_core::types::{IdentityRecord, LifecycleState, RotationOutcome};
use kiln_core::IdentityStore;
use tracing::{debug, info, warn};

use crate::rotation::Rotator;

/// Actor recorded on burns applied by health evaluation.
const HEALTH_ACTOR: &str = "health-check";

/// Tallies from one full sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSweep {
    pub checked: u64,
    pub rotated: u64,
}

/// One identity's verdict plus the rotation it provoked, if any.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub report: HealthReport,
    pub rotation: Option<RotationOutcome>,
}

enum Judged {
    Done(CheckOutcome),
    Stale,
}

/// Grades identities and rotates the ones that trip a trigger.
pub struct HealthChecker {
    store: Arc<dyn IdentityStore>,
    rotator: Arc<Rotator>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn IdentityStore>, rotator: Arc<Rotator>) -> Self {
        Self { store, rotator }
    }

    /// Evaluate one identity by id.
    pub async fn check(&self, identity_id: &str) -> Result<CheckOutcome> {
        let identity = self.fetch(identity_id).await?;
        self.check_identity(identity).await
    }

    /// Evaluate an already-loaded identity, stamp the verdict, and rotate
    /// when a trigger fires.
    pub async fn check_identity(&self, identity: IdentityRecord) -> Result<CheckOutcome> {
        match self.judge(&identity).await? {
            Judged::Done(outcome) => Ok(outcome),
            Judged::Stale => {
                let fresh = self.fetch(&identity.id).await?;
                match self.judge(&fresh).await? {
                    Judged::Done(outcome) => Ok(outcome),
                    Judged::Stale => {
                        warn!(
                            identity_id = %identity.id,
                            "identity kept moving during health check, deferring to next sweep"
                        );
                        Ok(CheckOutcome {
                            report: health::evaluate(&fresh),
                            rotation: None,
                        })
                    }
                }
            }
        }
    }

    /// Re-grade every identity the sweep covers (warm and warming).
    pub async fn run_sweep(&self) -> Result<HealthSweep> {
        let candidates = self.store.sweep_candidates().await?;
        let mut sweep = HealthSweep::default();
        for identity in candidates {
            let outcome = self.check_identity(identity).await?;
            sweep.checked += 1;
            if outcome.rotation.is_some() {
                sweep.rotated += 1;
            }
        }
        info!(
            checked = sweep.checked,
            rotated = sweep.rotated,
            "health sweep complete"
        );
        Ok(sweep)
    }

    /// One grade-stamp-rotate pass over a snapshot of the identity.
    async fn judge(&self, identity: &IdentityRecord) -> Result<Judged> {
        let report = health::evaluate(identity);
        self.store
            .stamp_health(&identity.id, report.status, report.deliverability_score)
            .await?;

        let Some(reason) = report.rotation else {
            return Ok(Judged::Done(CheckOutcome {
                report,
                rotation: None,
            }));
        };
        if matches!(
            identity.lifecycle_state,
            LifecycleState::Burned | LifecycleState::Retired
        ) {
            return Ok(Judged::Done(CheckOutcome {
                report,
                rotation: None,
            }));
        }

        match self
            .rotator
            .rotate(&identity.id, identity.version, reason, HEALTH_ACTOR)
            .await
        {
            Ok(rotation) => {
                info!(
                    identity_id = %identity.id,
                    reason = %reason,
                    status = %report.status,
                    "health trigger rotated identity"
                );
                Ok(Judged::Done(CheckOutcome {
                    report,
                    rotation: Some(rotation),
                }))
            }
            Err(KilnError::Conflict(message)) => {
                debug!(identity_id = %identity.id, %message, "burn hit a version conflict");
                Ok(Judged::Stale)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, id: &str) -> Result<IdentityRecord> {
        self.store
            .get_identity(id)
            .await?
            .ok_or_else(|| KilnError::NotFound { id: id.to_string() })
    }
}
