// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The warmup ramp.
//!
//! New identities cannot send at full volume on day one; inbox providers
//! throttle or junk sudden senders. The ramp walks a fixed fourteen-step
//! plan of rising daily caps. The plan is materialized onto the identity
//! when warmup starts so that later edits to the defaults never reshape a
//! ramp already in flight.

use serde::{Deserialize, Serialize};

use crate::error::{KilnError, Result};

/// Daily send caps for ramp days 1 through 14.
pub const RAMP_TARGETS: [i64; 14] = [
    5, 10, 15, 25, 40, 60, 80, 100, 125, 150, 175, 200, 250, 300,
];

/// One day of the ramp. `day` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupStep {
    pub day: i64,
    pub target: i64,
}

/// The full default ramp as a list of steps.
pub fn schedule() -> Vec<WarmupStep> {
    RAMP_TARGETS
        .iter()
        .enumerate()
        .map(|(i, target)| WarmupStep {
            day: i as i64 + 1,
            target: *target,
        })
        .collect()
}

/// The default ramp encoded for storage on an identity record.
pub fn schedule_json() -> Result<String> {
    serde_json::to_string(&schedule())
        .map_err(|e| KilnError::Internal(format!("encode warmup schedule: {e}")))
}

/// Cap for a given 1-based ramp day, `None` past the end of the plan.
pub fn target_for_day(day: i64) -> Option<i64> {
    if day < 1 {
        return None;
    }
    RAMP_TARGETS.get(day as usize - 1).copied()
}

/// Last day of the default plan.
pub fn final_day() -> i64 {
    RAMP_TARGETS.len() as i64
}
