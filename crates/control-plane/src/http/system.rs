use super::*;
use axum::http::header::CONTENT_TYPE;

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    git_sha: &'static str,
    dirty: bool,
    built_at: &'static str,
    schema_version: Option<i64>,
    target_schema_version: Option<i64>,
    pending_migrations: usize,
}

pub fn api_router() -> Router<AppState> {
    Router::<AppState>::new().route("/health", get(healthz))
}

pub fn metrics_router() -> Router<AppState> {
    Router::<AppState>::new().route("/metrics", get(metrics))
}

pub(crate) async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: crate::version::VERSION,
            git_sha: crate::version::GIT_SHA,
            dirty: crate::version::GIT_DIRTY,
            built_at: crate::version::BUILD_TIMESTAMP,
            schema_version: state.schema.latest_applied,
            target_schema_version: state.schema.latest_available,
            pending_migrations: state.schema.pending.len(),
        }),
    )
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics_handle.render();
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
