// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign-facing allocation.
//!
//! `allocate` is idempotent per campaign and race-safe across concurrent
//! callers: every claim is a conditional write in the store, and a lost
//! race moves on to the next ranked candidate instead of erroring. The
//! ranking itself lives in the store query (volume-per-problem descending,
//! least recently used first on ties).

use std::sync::Arc;
use std::time::Instant;

use kiln_config::model::PoolConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::types::{IdentityRecord, PoolSummary};
use kiln_core::IdentityStore;
use tracing::{debug, info, warn};

/// Hands warm identities to campaigns and takes them back.
pub struct Allocator {
    config: PoolConfig,
    store: Arc<dyn IdentityStore>,
}

impl Allocator {
    pub fn new(config: PoolConfig, store: Arc<dyn IdentityStore>) -> Self {
        Self { config, store }
    }

    /// Find a sending identity for a campaign.
    ///
    /// A campaign that already holds an identity gets the same one back.
    /// Otherwise the best-ranked candidates visible to the tenant are
    /// claimed in order until one sticks. `tenant_id = None` scopes the
    /// search to the shared pool.
    pub async fn allocate(
        &self,
        campaign_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<IdentityRecord> {
        let started = Instant::now();

        if let Some(held) = self.store.assignment_for_campaign(campaign_id).await? {
            debug!(
                campaign_id,
                identity_id = %held.id,
                "campaign already holds an identity"
            );
            kiln_metrics::record_allocation("reused");
            kiln_metrics::record_allocation_latency(started.elapsed().as_secs_f64());
            return Ok(held);
        }

        let candidates = self
            .store
            .allocation_candidates(tenant_id, self.config.allocation_attempts as i64)
            .await?;
        for candidate in candidates {
            if self.store.claim_identity(&candidate.id, campaign_id).await? {
                info!(
                    campaign_id,
                    identity_id = %candidate.id,
                    address = %candidate.address,
                    "identity allocated"
                );
                kiln_metrics::record_allocation("allocated");
                kiln_metrics::record_allocation_latency(started.elapsed().as_secs_f64());
                return self.fetch(&candidate.id).await;
            }
            debug!(
                identity_id = %candidate.id,
                "claim lost a race, trying next candidate"
            );
        }

        warn!(
            campaign_id,
            tenant = tenant_id.unwrap_or("shared"),
            "pool exhausted"
        );
        kiln_metrics::record_allocation("exhausted");
        kiln_metrics::record_allocation_latency(started.elapsed().as_secs_f64());
        Err(KilnError::NoAvailableIdentity {
            tenant_id: tenant_id.unwrap_or("shared").to_string(),
        })
    }

    /// Hand an identity back to the pool. Idempotent.
    pub async fn release(&self, identity_id: &str) -> Result<IdentityRecord> {
        let freed = self.store.release_identity(identity_id).await?;
        debug!(identity_id, "assignment released");
        Ok(freed)
    }

    /// Aggregate pool snapshot for dashboards and `kiln status`.
    pub async fn summary(&self) -> Result<PoolSummary> {
        let records = self.store.list_identities(None).await?;
        Ok(PoolSummary::from_records(&records))
    }

    /// Re-read a row we just claimed; the claim bumped its version and
    /// stamped `last_used_at`.
    async fn fetch(&self, id: &str) -> Result<IdentityRecord> {
        self.store
            .get_identity(id)
            .await?
            .ok_or_else(|| KilnError::NotFound { id: id.to_string() })
    }
}
