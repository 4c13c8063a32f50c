// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery event ingestion.
//!
//! Transports report per-message outcomes after the fact. Each event bumps
//! the identity's counters, moves its reputation, and, for the negative
//! events, re-checks health on the spot so a sender that just crossed a
//! rotation threshold is pulled before the next allocation instead of
//! surviving until the hourly sweep.

use std::sync::Arc;

use kiln_core::error::{KilnError, Result};
use kiln_core::health;
use kiln_core::types::{IdentityRecord, SendEvent};
use kiln_core::IdentityStore;
use tracing::debug;

use crate::health::{CheckOutcome, HealthChecker};

/// What one ingested event did to the identity.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    /// The identity after the event was applied. When the event provoked a
    /// rotation this is the burned record.
    pub identity: IdentityRecord,
    /// Reputation score after the adjustment.
    pub reputation: f64,
    /// Health verdict, including any rotation the event provoked.
    pub check: CheckOutcome,
}

/// Applies delivery events and triggers inline rotation when they bite.
pub struct EventIngestor {
    store: Arc<dyn IdentityStore>,
    health: Arc<HealthChecker>,
}

impl EventIngestor {
    pub fn new(store: Arc<dyn IdentityStore>, health: Arc<HealthChecker>) -> Self {
        Self { store, health }
    }

    /// Find the identity an event refers to. Transports usually know the
    /// sending address rather than the pool id, so either is accepted.
    pub async fn resolve(&self, key: &str) -> Result<IdentityRecord> {
        if let Some(identity) = self.store.get_identity(key).await? {
            return Ok(identity);
        }
        self.store
            .get_identity_by_address(key)
            .await?
            .ok_or_else(|| KilnError::NotFound {
                id: key.to_string(),
            })
    }

    /// Record one delivery event against the identity `key` resolves to.
    pub async fn ingest(&self, key: &str, event: SendEvent) -> Result<EventOutcome> {
        let identity = self.resolve(key).await?;

        match event {
            SendEvent::Delivered => self.store.record_send(&identity.id).await?,
            SendEvent::BouncedHard | SendEvent::BouncedSoft => {
                // A bounce is still a send attempt; counting both keeps
                // bounce_rate = bounces / attempts honest.
                self.store.record_send(&identity.id).await?;
                self.store.record_bounce(&identity.id).await?;
            }
            SendEvent::SpamComplaint => self.store.record_spam_complaint(&identity.id).await?,
            SendEvent::Reply => self.store.record_reply(&identity.id).await?,
        }
        let reputation = self
            .store
            .adjust_reputation(&identity.id, health::reputation_delta(event))
            .await?;

        let updated = self.fetch(&identity.id).await?;
        let check = match event {
            // Positive events never push an identity over a threshold, so
            // grade in memory without the stamp-and-burn path.
            SendEvent::Delivered | SendEvent::Reply => CheckOutcome {
                report: health::evaluate(&updated),
                rotation: None,
            },
            SendEvent::BouncedHard | SendEvent::BouncedSoft | SendEvent::SpamComplaint => {
                self.health.check_identity(updated.clone()).await?
            }
        };
        let identity = if check.rotation.is_some() {
            self.fetch(&updated.id).await?
        } else {
            updated
        };

        debug!(
            identity_id = %identity.id,
            event = %event,
            reputation,
            status = %check.report.status,
            rotated = check.rotation.is_some(),
            "delivery event ingested"
        );
        kiln_metrics::record_event(&event.to_string());

        Ok(EventOutcome {
            identity,
            reputation,
            check,
        })
    }

    async fn fetch(&self, id: &str) -> Result<IdentityRecord> {
        self.store
            .get_identity(id)
            .await?
            .ok_or_else(|| KilnError::NotFound { id: id.to_string() })
    }
}
