// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pool services for the kiln identity pool manager.
//!
//! Each service sequences `kiln-core` policy against the
//! [`IdentityStore`](kiln_core::IdentityStore) trait:
//!
//! - [`allocator`]: campaign-scoped identity leasing
//! - [`warmup`]: ramp start and the daily advancement pass
//! - [`health`]: grading sweeps with synchronous rotation
//! - [`rotation`]: burn-and-replace plus the follow-up queue
//! - [`events`]: delivery event ingestion from transports
//! - [`tiers`]: billing tier changes and term expiry
//! - [`maintenance`]: the cron scheduler that drives the sweeps
//! - [`shutdown`]: signal handling for graceful stop
//!
//! Policy decides, the store applies under version guards, and these
//! services sequence the two so concurrent writers stay correct.

pub mod allocator;
pub mod events;
pub mod health;
pub mod maintenance;
pub mod rotation;
pub mod shutdown;
pub mod tiers;
pub mod warmup;

pub use allocator::Allocator;
pub use events::{EventIngestor, EventOutcome};
pub use health::{CheckOutcome, HealthChecker, HealthSweep};
pub use maintenance::{MaintenanceJob, MaintenanceRunner};
pub use rotation::{Rotator, ROTATION_PRIORITY};
pub use shutdown::install_signal_handler;
pub use tiers::TierManager;
pub use warmup::{WarmupRunner, WarmupSweep};
