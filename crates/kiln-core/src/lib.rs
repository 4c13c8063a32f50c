// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core building blocks for the Kiln sending-identity pool manager.
//!
//! This crate owns the domain model and every piece of pure policy:
//!
//! - [`types`]: records, enums, and id/timestamp helpers
//! - [`lifecycle`]: the cold/warming/warm/cooling/burned/retired machine
//! - [`warmup`]: the fourteen-step ramp plan
//! - [`health`]: grading, rotation triggers, reputation deltas
//! - [`tier`]: the billing tier limit table
//! - [`store`]: the async persistence trait service crates depend on
//! - [`error`]: the workspace-wide [`KilnError`]
//!
//! Nothing here performs IO; the storage and service crates compose these
//! pieces.

pub mod error;
pub mod health;
pub mod lifecycle;
pub mod store;
pub mod tier;
pub mod types;
pub mod warmup;

pub use error::{KilnError, Result};
pub use store::IdentityStore;
pub use types::{
    BillingTier, BurnOutcome, FollowupItem, FollowupStatus, HealthStatus, IdentityKind,
    IdentityRecord, LifecycleState, NewIdentity, PoolSummary, RotationFollowup, RotationOutcome,
    RotationReason, SendEvent, TransitionEntry,
};
