// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP transport over the logical request API of spec §6.1:
//! `execute_pattern`, `list_patterns`, `list_capabilities`, `list_agents`,
//! `route_intent`, plus Pricing Pack Store operations and a reload endpoint
//! (patterns are reloadable; a successful reload swaps indexes atomically).

pub mod bootstrap;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxPath, Query, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use qpr_core::{RequestContextBuilder, Value};
use qpr_error::{ErrorKind, RuntimeError, RuntimeErrorDto};
use qpr_router::KeywordRouter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub use bootstrap::Runtime;

/// Shared application state handed to every route handler.
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub pattern_dir: std::path::PathBuf,
    pub config: qpr_config::RuntimeConfig,
    /// Request-entry concurrency gate (spec §5 "Maximum in-flight
    /// requests"). A permit is held for the duration of one request;
    /// exhaustion rejects with [`ErrorKind::Backpressure`] before the
    /// request ever reaches an agent.
    pub in_flight: Arc<Semaphore>,
}

impl AppState {
    /// Build application state, sizing the in-flight semaphore from
    /// `config.max_in_flight`.
    pub fn new(runtime: Arc<Runtime>, pattern_dir: std::path::PathBuf, config: qpr_config::RuntimeConfig) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight));
        Self {
            runtime,
            pattern_dir,
            config,
            in_flight,
        }
    }
}

/// Build the Axum router with all daemon routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/patterns", get(cmd_list_patterns))
        .route("/patterns/reload", post(cmd_reload_patterns))
        .route("/patterns/validate", post(cmd_validate_pattern))
        .route("/capabilities", get(cmd_list_capabilities))
        .route("/agents", get(cmd_list_agents))
        .route("/route", post(cmd_route))
        .route("/run", post(cmd_run))
        .route("/pricing-packs", post(cmd_pricing_create))
        .route("/pricing-packs/latest", get(cmd_pricing_get_latest))
        .route("/pricing-packs/{pack_id}/supersede", post(cmd_pricing_supersede))
        .route("/pricing-packs/{pack_id}/chain", get(cmd_pricing_chain))
        .layer(middleware::from_fn_with_state(state.clone(), backpressure_middleware))
        .with_state(state)
}

/// Request-entry concurrency gate (spec §5/§7): a request that arrives once
/// `max_in_flight` permits are already held is rejected immediately with
/// [`ErrorKind::Backpressure`], without being routed to an agent.
async fn backpressure_middleware(
    State(state): State<Arc<AppState>>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    match state.in_flight.clone().try_acquire_owned() {
        Ok(permit) => {
            let response = next.run(req).await;
            drop(permit);
            response
        }
        Err(_) => {
            warn!(max_in_flight = state.config.max_in_flight, "request rejected: in-flight ceiling reached");
            let err = RuntimeError::new(ErrorKind::Backpressure, "maximum in-flight requests exceeded");
            ApiError::from(&err).into_response()
        }
    }
}

/// A uniform error response. Never carries a stack trace or cause chain;
/// `detail` is the wire-safe [`RuntimeErrorDto`] when the failure originated
/// in the runtime, `None` for transport-level failures (bad JSON, 404).
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub detail: Option<RuntimeErrorDto>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

/// Map an [`ErrorKind`] to the HTTP status a client should see: access and
/// validation failures are 4xx, circuit/transient conditions are 503, and
/// anything else surfaces as 500.
fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput | ErrorKind::ValidationFailure => StatusCode::BAD_REQUEST,
        ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        ErrorKind::UnknownCapability | ErrorKind::UnknownPattern | ErrorKind::MissingPricingPack => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::UnresolvedIntent => StatusCode::NOT_FOUND,
        ErrorKind::RequiredContextMissing => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::CircuitOpen | ErrorKind::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::AgentTransientFailure | ErrorKind::AgentPermanentFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ExecutionCancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
    }
}

impl From<&RuntimeError> for ApiError {
    fn from(err: &RuntimeError) -> Self {
        Self {
            status: status_for_kind(err.kind),
            message: err.to_string(),
            detail: Some(RuntimeErrorDto::from(err)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message, "detail": self.detail }));
        (self.status, body).into_response()
    }
}

async fn cmd_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Serialize)]
struct PatternSummary {
    id: String,
    version: String,
    description: String,
    category: Option<String>,
    tags: Vec<String>,
    inputs: Vec<qpr_pattern::InputSpec>,
}

async fn cmd_list_patterns(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut out = Vec::new();
    for id in state.runtime.patterns.list_ids() {
        if let Some(loaded) = state.runtime.patterns.by_id(&id) {
            out.push(PatternSummary {
                id: loaded.pattern.id.clone(),
                version: loaded.pattern.version.clone(),
                description: loaded.pattern.description.clone(),
                category: loaded.pattern.category.clone(),
                tags: loaded.pattern.tags.clone(),
                inputs: loaded.pattern.inputs.clone(),
            });
        }
    }
    Json(out)
}

/// `POST /patterns/reload`: re-scan the pattern directory, atomically
/// swapping the loaded index. Leaves the previous snapshot intact on
/// failure (spec §4.5).
async fn cmd_reload_patterns(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state
        .runtime
        .patterns
        .reload(&state.pattern_dir, &state.runtime.registry)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    info!(dir = %state.pattern_dir.display(), "patterns reloaded");
    Ok(Json(json!({ "reloaded": true, "pattern_count": state.runtime.patterns.len() })))
}

async fn cmd_validate_pattern(
    State(state): State<Arc<AppState>>,
    Json(pattern): Json<qpr_pattern::Pattern>,
) -> Result<impl IntoResponse, ApiError> {
    qpr_pattern::validate(&pattern, &state.runtime.registry)
        .map_err(|errors| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, format!("{errors:?}")))?;
    Ok(Json(json!({ "valid": true })))
}

async fn cmd_list_capabilities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.runtime.registry.list_capabilities())
}

async fn cmd_list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.runtime.registry.list_agents())
}

#[derive(Debug, Deserialize)]
struct RouteRequest {
    query: String,
    #[serde(default = "default_threshold")]
    threshold: f64,
}

fn default_threshold() -> f64 {
    0.2
}

async fn cmd_route(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RouteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let index = state.runtime.patterns.route_index();
    let router = KeywordRouter::new(req.threshold);
    let m = router
        .route(&index, &req.query)
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    Ok(Json(m))
}

/// Body for `POST /run` (spec §6.1 `execute_pattern`).
#[derive(Debug, Deserialize)]
struct RunRequest {
    pattern_id: String,
    user_id: String,
    portfolio_id: String,
    asof_date: NaiveDate,
    #[serde(default)]
    pricing_pack_id: Option<String>,
    #[serde(default)]
    ledger_commit_hash: Option<String>,
    #[serde(default)]
    rights: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default = "default_inputs")]
    inputs: serde_json::Value,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_inputs() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

#[derive(Debug, Serialize)]
struct RunResponse {
    outputs: Value,
    trace: qpr_core::Trace,
    provenance: qpr_core::ProvenanceSummary,
}

async fn cmd_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut builder = RequestContextBuilder::new(req.user_id, req.portfolio_id, req.asof_date)
        .timeout(Duration::from_secs(req.timeout_secs))
        .rights(req.rights);
    if let Some(pack) = req.pricing_pack_id {
        builder = builder.pricing_pack_id(pack);
    }
    if let Some(commit) = req.ledger_commit_hash {
        builder = builder.ledger_commit_hash(commit);
    }
    let ctx = builder.build();
    let inputs = Value::from(req.inputs);

    match state.runtime.orchestrator.execute(&req.pattern_id, inputs, &ctx).await {
        Ok(result) => Ok(Json(RunResponse {
            outputs: result.outputs,
            trace: result.trace,
            provenance: result.provenance,
        })),
        Err(err) => Err(ApiError::from(&err.error)),
    }
}

#[derive(Debug, Deserialize)]
struct PricingCreateRequest {
    asof_date: NaiveDate,
    hash: String,
    #[serde(default)]
    sources: BTreeSet<String>,
}

async fn cmd_pricing_create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PricingCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pack = state
        .runtime
        .pricing
        .create_pack(req.asof_date, req.sources, req.hash)
        .await
        .map_err(|e| ApiError::from(&e.into_runtime_error()))?;
    Ok(Json(pack))
}

#[derive(Debug, Deserialize)]
struct PricingSupersedeRequest {
    hash: String,
    #[serde(default)]
    sources: BTreeSet<String>,
    reason: String,
}

async fn cmd_pricing_supersede(
    State(state): State<Arc<AppState>>,
    AxPath(pack_id): AxPath<String>,
    Json(req): Json<PricingSupersedeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (old, new) = state
        .runtime
        .pricing
        .supersede(&pack_id, req.sources, req.hash, req.reason)
        .await
        .map_err(|e| ApiError::from(&e.into_runtime_error()))?;
    Ok(Json(json!({ "old": old, "new": new })))
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    asof: NaiveDate,
}

async fn cmd_pricing_get_latest(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LatestQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pack = state
        .runtime
        .pricing
        .get_latest(q.asof)
        .await
        .map_err(|e| ApiError::from(&e.into_runtime_error()))?;
    Ok(Json(pack))
}

async fn cmd_pricing_chain(
    State(state): State<Arc<AppState>>,
    AxPath(pack_id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let chain = state
        .runtime
        .pricing
        .list_chain(&pack_id)
        .await
        .map_err(|e| ApiError::from(&e.into_runtime_error()))?;
    Ok(Json(chain))
}
