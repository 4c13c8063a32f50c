// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules, one per concern. All functions are async free functions
//! over [`crate::database::Database`]; guarded mutations run inside a single
//! transaction on the writer thread.

pub mod allocation;
pub mod followups;
pub mod identities;
pub mod jobs;
pub mod lifecycle;
pub mod tiers;
