// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the kiln identity pool.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a
//! single-writer concurrency model via `tokio-rusqlite`, and typed query
//! modules for identities, lifecycle transitions, allocation, billing
//! tiers, and the rotation follow-up queue. [`SqliteStore`] ties the query
//! modules together behind the `IdentityStore` trait.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod store;

pub use database::Database;
pub use models::*;
pub use store::SqliteStore;
