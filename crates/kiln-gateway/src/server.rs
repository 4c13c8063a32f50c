// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use kiln_core::error::{KilnError, Result};
use kiln_core::IdentityStore;
use kiln_pool::{Allocator, EventIngestor, Rotator, TierManager, WarmupRunner};

use crate::auth::{auth_middleware, AuthConfig};
use crate::handlers;

/// The service graph behind the API. Built once by the binary and shared
/// by every handler.
pub struct Services {
    pub store: Arc<dyn IdentityStore>,
    pub allocator: Allocator,
    pub events: EventIngestor,
    pub warmups: Arc<WarmupRunner>,
    pub tiers: Arc<TierManager>,
    pub rotator: Arc<Rotator>,
}

/// Health state for the unauthenticated health/metrics endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Optional Prometheus metrics render function.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub services: Arc<Services>,
    pub auth: AuthConfig,
    pub health: HealthState,
}

/// Gateway server configuration. Mirrors `GatewayConfig` from kiln-config
/// to avoid a config-crate dependency here.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_address: String,
    /// Port to bind.
    pub port: u16,
}

/// Build the full route tree around the shared state.
pub fn router(state: GatewayState) -> Router {
    let auth_state = state.auth.clone();

    // Unauthenticated public routes (health + metrics for systemd and
    // Prometheus).
    let public_routes = Router::new()
        .route("/health", get(handlers::get_public_health))
        .route("/metrics", get(handlers::get_public_metrics))
        .with_state(state.clone());

    // Routes requiring authentication.
    let api_routes = Router::new()
        .route("/v1/identities", post(handlers::post_identities))
        .route("/v1/identities/{id}/warmup", post(handlers::post_warmup))
        .route("/v1/pool/summary", get(handlers::get_pool_summary))
        .route("/v1/pool/allocate", post(handlers::post_allocate))
        .route("/v1/pool/{id}", get(handlers::get_pool_identity))
        .route("/v1/pool/{id}/rotate", post(handlers::post_rotate))
        .route("/v1/pool/{id}/upgrade", post(handlers::post_upgrade))
        .route("/v1/pool/{id}/release", post(handlers::post_release))
        .route("/v1/pool/{id}/cool", post(handlers::post_cool))
        .route("/v1/pool/{id}/resume", post(handlers::post_resume))
        .route("/v1/pool/{id}/retire", post(handlers::post_retire))
        .route("/v1/events", post(handlers::post_events))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(CorsLayer::permissive())
}

/// Start the gateway HTTP server.
///
/// Binds to the configured address and serves until `shutdown` fires;
/// in-flight requests finish before this returns.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| KilnError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| KilnError::Internal(format!("gateway server error: {e}")))?;

    Ok(())
}
