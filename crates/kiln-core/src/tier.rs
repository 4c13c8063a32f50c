// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Billing tier limit table.

use serde::{Deserialize, Serialize};

use crate::types::BillingTier;

/// Length of one paid term. Upgrades stamp `expires_at` this many days
/// after purchase.
pub const TERM_DAYS: i64 = 30;

/// Send limits and feature flags attached to a billing tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub daily_limit: i64,
    pub hourly_limit: i64,
    pub monthly_price_usd: i64,
    pub auto_warmup: bool,
    pub priority_routing: bool,
    pub dedicated_pool: bool,
}

impl TierLimits {
    /// Canonical limit table. Paid tiers expire after [`TERM_DAYS`] unless
    /// auto-renew is set; the free tier never expires.
    pub const fn for_tier(tier: BillingTier) -> TierLimits {
        match tier {
            BillingTier::Free => TierLimits {
                daily_limit: 50,
                hourly_limit: 10,
                monthly_price_usd: 0,
                auto_warmup: false,
                priority_routing: false,
                dedicated_pool: false,
            },
            BillingTier::Starter => TierLimits {
                daily_limit: 500,
                hourly_limit: 50,
                monthly_price_usd: 49,
                auto_warmup: true,
                priority_routing: false,
                dedicated_pool: false,
            },
            BillingTier::Pro => TierLimits {
                daily_limit: 2000,
                hourly_limit: 200,
                monthly_price_usd: 149,
                auto_warmup: true,
                priority_routing: true,
                dedicated_pool: false,
            },
            BillingTier::Enterprise => TierLimits {
                daily_limit: 10_000,
                hourly_limit: 1000,
                monthly_price_usd: 499,
                auto_warmup: true,
                priority_routing: true,
                dedicated_pool: true,
            },
        }
    }
}
