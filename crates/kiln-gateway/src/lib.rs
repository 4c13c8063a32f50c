// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway for the kiln pool management API.
//!
//! A thin axum surface over the kiln-pool services: provisioning, warmup,
//! allocation, rotation, tier changes, and delivery-event ingestion, plus
//! unauthenticated health and Prometheus endpoints. Every `/v1` route sits
//! behind a bearer token; the binary builds the service graph and hands it
//! over as [`server::Services`].

pub mod auth;
pub mod handlers;
pub mod server;

pub use auth::AuthConfig;
pub use server::{start_server, GatewayState, HealthState, ServerConfig, Services};
