// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the pool management API.
//!
//! Handlers stay thin: decode the body, resolve the optimistic-lock
//! version, call into the service graph, and map `KilnError` onto status
//! codes through [`ApiError`]. Mutations accept an optional `version`
//! field; when it is absent the handler targets the row as it stands and
//! a concurrent writer surfaces as a `409` the caller can retry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use kiln_core::error::KilnError;
use kiln_core::tier::TierLimits;
use kiln_core::types::{
    BillingTier, HealthStatus, IdentityKind, IdentityRecord, LifecycleState, NewIdentity,
    PoolSummary, RotationOutcome, RotationReason, SendEvent, TransitionEntry,
};

use crate::server::GatewayState;

/// Actor recorded on transitions when the request names none.
const DEFAULT_ACTOR: &str = "operator";

/// Transition log rows returned by the identity detail endpoint.
const TRANSITION_LIMIT: i64 = 20;

fn default_actor() -> String {
    DEFAULT_ACTOR.to_string()
}

fn default_rotation_reason() -> RotationReason {
    RotationReason::ManualRotation
}

/// Request body for POST /v1/identities.
#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    /// Domain name or full mailbox address to onboard.
    pub address: String,
    pub kind: IdentityKind,
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Whether any tenant may borrow the identity. Defaults to `true` for
    /// tenant-less identities and `false` for owned ones.
    #[serde(default)]
    pub shared: Option<bool>,
    #[serde(default)]
    pub billing_tier: Option<BillingTier>,
    #[serde(default)]
    pub auto_renew: bool,
}

/// Body shared by the version-guarded lifecycle endpoints. Every field is
/// optional, so an empty or absent body applies the operation to the row
/// as it stands.
#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_actor")]
    pub actor: String,
}

impl Default for LifecycleRequest {
    fn default() -> Self {
        Self {
            version: None,
            reason: None,
            actor: default_actor(),
        }
    }
}

/// Request body for POST /v1/pool/{id}/rotate.
#[derive(Debug, Deserialize)]
pub struct RotateRequest {
    #[serde(default = "default_rotation_reason")]
    pub reason: RotationReason,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default = "default_actor")]
    pub actor: String,
}

impl Default for RotateRequest {
    fn default() -> Self {
        Self {
            reason: default_rotation_reason(),
            version: None,
            actor: default_actor(),
        }
    }
}

/// Request body for POST /v1/pool/{id}/upgrade.
#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    pub tier: BillingTier,
    #[serde(default)]
    pub auto_renew: bool,
    #[serde(default)]
    pub version: Option<i64>,
}

/// Request body for POST /v1/pool/allocate.
#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    pub campaign_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Request body for POST /v1/events.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    /// Pool id or sending address of the identity the event refers to.
    pub identity: String,
    pub event: SendEvent,
}

/// Response body for POST /v1/events.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    /// The identity after the event was applied; the burned record when
    /// the event provoked a rotation.
    pub identity: IdentityRecord,
    pub reputation: f64,
    pub status: HealthStatus,
    pub deliverability_score: f64,
    pub rotation: Option<RotationOutcome>,
}

/// Response body for GET /v1/pool/summary.
#[derive(Debug, Serialize)]
pub struct PoolSummaryResponse {
    pub summary: PoolSummary,
    pub identities: Vec<IdentitySnapshot>,
}

/// Compact per-identity row inside the pool summary.
#[derive(Debug, Serialize)]
pub struct IdentitySnapshot {
    pub id: String,
    pub address: String,
    pub kind: IdentityKind,
    pub lifecycle_state: LifecycleState,
    pub health_status: Option<HealthStatus>,
    pub reputation_score: f64,
    pub deliverability_score: f64,
    pub sent_today: i64,
    pub daily_limit: i64,
    pub billing_tier: BillingTier,
    pub assigned_campaign_id: Option<String>,
}

impl From<&IdentityRecord> for IdentitySnapshot {
    fn from(record: &IdentityRecord) -> Self {
        Self {
            id: record.id.clone(),
            address: record.address.clone(),
            kind: record.kind,
            lifecycle_state: record.lifecycle_state,
            health_status: record.health_status,
            reputation_score: record.reputation_score,
            deliverability_score: record.deliverability_score,
            sent_today: record.sent_today,
            daily_limit: record.daily_limit,
            billing_tier: record.billing_tier,
            assigned_campaign_id: record.assigned_campaign_id.clone(),
        }
    }
}

/// Response body for GET /v1/pool/{id}.
#[derive(Debug, Serialize)]
pub struct IdentityDetailResponse {
    pub identity: IdentityRecord,
    /// Newest lifecycle transitions first.
    pub recent_transitions: Vec<TransitionEntry>,
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Error response body. `code` carries the stable machine-readable value
/// from [`KilnError::code`].
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Wrapper that turns `KilnError` into a JSON error response.
pub struct ApiError(pub KilnError);

impl From<KilnError> for ApiError {
    fn from(err: KilnError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            KilnError::NotFound { .. } => StatusCode::NOT_FOUND,
            KilnError::InvalidTransition { .. }
            | KilnError::InvalidState { .. }
            | KilnError::Conflict(_)
            | KilnError::NoAvailableIdentity { .. } => StatusCode::CONFLICT,
            KilnError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            KilnError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            KilnError::Config(_) | KilnError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn fetch_identity(
    state: &GatewayState,
    id: &str,
) -> kiln_core::error::Result<IdentityRecord> {
    state
        .services
        .store
        .get_identity(id)
        .await?
        .ok_or_else(|| KilnError::NotFound { id: id.to_string() })
}

/// Resolve the optimistic-lock version a mutation should run against.
async fn resolve_version(
    state: &GatewayState,
    id: &str,
    given: Option<i64>,
) -> kiln_core::error::Result<i64> {
    match given {
        Some(version) => Ok(version),
        None => Ok(fetch_identity(state, id).await?.version),
    }
}

/// GET /health
///
/// Unauthenticated liveness probe for systemd and load balancers.
pub async fn get_public_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
    })
}

/// GET /metrics
///
/// Prometheus text exposition. Returns 404 when the binary started
/// without a metrics recorder.
pub async fn get_public_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (StatusCode::OK, render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed\n").into_response(),
    }
}

/// POST /v1/identities
///
/// Provision a new identity. It lands `cold`; starting the warmup ramp is
/// a separate call.
pub async fn post_identities(
    State(state): State<GatewayState>,
    Json(body): Json<ProvisionRequest>,
) -> ApiResult<(StatusCode, Json<IdentityRecord>)> {
    if body.address.trim().is_empty() {
        return Err(KilnError::InvalidArgument("address must not be empty".to_string()).into());
    }
    let tier = body.billing_tier.unwrap_or(BillingTier::Free);
    let shared = body.shared.unwrap_or(body.tenant_id.is_none());
    let new = NewIdentity {
        address: body.address,
        kind: body.kind,
        tenant_id: body.tenant_id,
        shared,
        billing_tier: tier,
        auto_renew: body.auto_renew,
    };
    let record = state
        .services
        .store
        .create_identity(&new, &TierLimits::for_tier(tier))
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /v1/identities/{id}/warmup
///
/// Start the warmup ramp for a cold identity.
pub async fn post_warmup(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Option<Json<LifecycleRequest>>,
) -> ApiResult<Json<IdentityRecord>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let version = resolve_version(&state, &id, body.version).await?;
    let record = state.services.warmups.start(&id, version, &body.actor).await?;
    Ok(Json(record))
}

/// GET /v1/pool/summary
pub async fn get_pool_summary(
    State(state): State<GatewayState>,
) -> ApiResult<Json<PoolSummaryResponse>> {
    let records = state.services.store.list_identities(None).await?;
    let summary = PoolSummary::from_records(&records);
    let identities = records.iter().map(IdentitySnapshot::from).collect();
    Ok(Json(PoolSummaryResponse {
        summary,
        identities,
    }))
}

/// GET /v1/pool/{id}
///
/// Full record plus the tail of its transition audit log.
pub async fn get_pool_identity(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<IdentityDetailResponse>> {
    let identity = fetch_identity(&state, &id).await?;
    let recent_transitions = state
        .services
        .store
        .transitions_for(&identity.id, TRANSITION_LIMIT)
        .await?;
    Ok(Json(IdentityDetailResponse {
        identity,
        recent_transitions,
    }))
}

/// POST /v1/pool/allocate
///
/// Campaign-start hook. Idempotent per campaign.
pub async fn post_allocate(
    State(state): State<GatewayState>,
    Json(body): Json<AllocateRequest>,
) -> ApiResult<Json<IdentityRecord>> {
    let record = state
        .services
        .allocator
        .allocate(&body.campaign_id, body.tenant_id.as_deref())
        .await?;
    Ok(Json(record))
}

/// POST /v1/pool/{id}/release
///
/// Campaign-end hook. Idempotent.
pub async fn post_release(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<IdentityRecord>> {
    let record = state.services.allocator.release(&id).await?;
    Ok(Json(record))
}

/// POST /v1/pool/{id}/rotate
///
/// Operator-triggered burn-and-replace. The reason defaults to
/// `manual_rotation`.
pub async fn post_rotate(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Option<Json<RotateRequest>>,
) -> ApiResult<Json<RotationOutcome>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let version = resolve_version(&state, &id, body.version).await?;
    let outcome = state
        .services
        .rotator
        .rotate(&id, version, body.reason, &body.actor)
        .await?;
    Ok(Json(outcome))
}

/// POST /v1/pool/{id}/upgrade
///
/// Billing tier change in either direction. Paid tiers open a fresh
/// 30-day term.
pub async fn post_upgrade(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<UpgradeRequest>,
) -> ApiResult<Json<IdentityRecord>> {
    let version = resolve_version(&state, &id, body.version).await?;
    let record = state
        .services
        .tiers
        .change_tier(&id, version, body.tier, body.auto_renew)
        .await?;
    Ok(Json(record))
}

/// POST /v1/pool/{id}/cool
///
/// Pause a live identity (`warm` -> `cooling`).
pub async fn post_cool(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Option<Json<LifecycleRequest>>,
) -> ApiResult<Json<IdentityRecord>> {
    apply_transition(&state, &id, LifecycleState::Cooling, body).await
}

/// POST /v1/pool/{id}/resume
///
/// Re-enter the ramp from `cooling` (`cooling` -> `warming`).
pub async fn post_resume(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Option<Json<LifecycleRequest>>,
) -> ApiResult<Json<IdentityRecord>> {
    apply_transition(&state, &id, LifecycleState::Warming, body).await
}

/// POST /v1/pool/{id}/retire
///
/// Terminal decommission.
pub async fn post_retire(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Option<Json<LifecycleRequest>>,
) -> ApiResult<Json<IdentityRecord>> {
    apply_transition(&state, &id, LifecycleState::Retired, body).await
}

async fn apply_transition(
    state: &GatewayState,
    id: &str,
    to: LifecycleState,
    body: Option<Json<LifecycleRequest>>,
) -> ApiResult<Json<IdentityRecord>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let version = resolve_version(state, id, body.version).await?;
    let record = state
        .services
        .store
        .transition_state(id, to, version, &body.actor, body.reason.as_deref())
        .await?;
    Ok(Json(record))
}

/// POST /v1/events
///
/// Transport callback ingestion. Negative events re-check health inline,
/// so the response may carry the rotation the event provoked.
pub async fn post_events(
    State(state): State<GatewayState>,
    Json(body): Json<EventRequest>,
) -> ApiResult<Json<EventResponse>> {
    let outcome = state
        .services
        .events
        .ingest(&body.identity, body.event)
        .await?;
    Ok(Json(EventResponse {
        reputation: outcome.reputation,
        status: outcome.check.report.status,
        deliverability_score: outcome.check.report.deliverability_score,
        rotation: outcome.check.rotation,
        identity: outcome.identity,
    }))
}
