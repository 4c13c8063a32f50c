// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The lifecycle state machine.
//!
//! Every state mutation in the system funnels through [`check`] before it
//! touches the store, so the set of legal edges lives in exactly one place.
//!
//! ```text
//!   cold ──► warming ──► warm ──► cooling
//!              ▲  │        │  ▲      │
//!              │  └────────┼──┼──────┘ (cooling ─► warming)
//!              │           │  │
//!   cold/warming/warm/cooling ──► burned ──► retired
//!                          │
//!                          └────► retired (graceful decommission)
//! ```

use crate::error::{KilnError, Result};
use crate::types::LifecycleState;

use LifecycleState::*;

/// Edges a given state may take.
pub fn allowed_from(from: LifecycleState) -> &'static [LifecycleState] {
    match from {
        Cold => &[Warming, Burned],
        Warming => &[Warm, Cooling, Burned],
        Warm => &[Cooling, Burned, Retired],
        Cooling => &[Warming, Burned],
        Burned => &[Retired],
        Retired => &[],
    }
}

/// Whether `from -> to` is a legal edge.
pub fn is_allowed(from: LifecycleState, to: LifecycleState) -> bool {
    allowed_from(from).contains(&to)
}

/// Validate an edge, returning [`KilnError::InvalidTransition`] when the
/// machine forbids it. Self-edges are never legal.
pub fn check(from: LifecycleState, to: LifecycleState) -> Result<()> {
    if is_allowed(from, to) {
        Ok(())
    } else {
        Err(KilnError::InvalidTransition { from, to })
    }
}
