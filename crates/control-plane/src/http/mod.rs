//! HTTP surface of the control plane.
//!
//! Administrators and users authenticate with static bearer tokens; edge
//! nodes authenticate with their cluster credentials under `/api/v1/agent`.
//! Handlers stay thin: they extract the caller, call into `services` and
//! serialize the result.

use crate::{
    app_state::AppState,
    auth::{require_caller, require_node, Caller},
    error::ApiResult,
    metrics::HttpMetricsLayer,
    services,
};
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

mod agents;
mod clusters;
mod error_mapper;
mod messages;
mod nodes;
mod servers;
mod system;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Wrapper for endpoints that return a bare count or id.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IdResponse {
    pub id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LimitParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RoleParams {
    pub role: Option<String>,
}

pub fn build_router(state: AppState) -> Router<AppState> {
    let middleware_stack = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(HttpMetricsLayer)
        .layer(RequestBodyLimitLayer::new(state.limits.body_bytes as usize));
    Router::<AppState>::new()
        .merge(system::api_router())
        .merge(agents::router(state.clone()))
        .merge(servers::router(state.clone()))
        .merge(clusters::router(state.clone()))
        .merge(nodes::router(state.clone()))
        .merge(messages::router(state))
        .layer(middleware_stack)
}

pub fn build_metrics_router() -> Router<AppState> {
    system::metrics_router()
}

/// Router whose routes all require an administrator or user token.
fn caller_routes(state: AppState, routes: Router<AppState>) -> Router<AppState> {
    routes.route_layer(middleware::from_fn_with_state(state, require_caller))
}
