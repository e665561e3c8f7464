use super::*;
use common::api::{
    HttpRequestStatUpload, NodeTaskPage, ServerConfigItem, ServerConfigVersion, TaskAckRequest,
    TaskAckResponse,
};
use crate::services::messages::{ClusterMessageRequest, MessageCreated};

/// Endpoints called by edge nodes with their cluster credentials.
pub fn router(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .route("/api/v1/agent/tasks", get(poll_tasks))
        .route("/api/v1/agent/tasks/ack", post(ack_tasks))
        .route("/api/v1/agent/server-configs", get(server_configs))
        .route("/api/v1/agent/server-configs/versions", get(server_config_versions))
        .route("/api/v1/agent/messages", post(create_node_message))
        .route("/api/v1/agent/http-stats", post(upload_http_stats))
        .route_layer(middleware::from_fn_with_state(state, require_node))
}

pub(crate) async fn poll_tasks(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<NodeTaskPage>> {
    Ok(Json(
        services::sync::poll_tasks(&state, &caller, params.limit).await?,
    ))
}

pub(crate) async fn ack_tasks(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<TaskAckRequest>,
) -> ApiResult<Json<TaskAckResponse>> {
    Ok(Json(
        services::sync::ack_tasks(&state, &caller, body.last_task_id).await?,
    ))
}

pub(crate) async fn server_configs(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<ServerConfigItem>>> {
    Ok(Json(
        services::sync::cluster_server_configs(&state, &caller, None).await?,
    ))
}

pub(crate) async fn server_config_versions(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<ServerConfigVersion>>> {
    Ok(Json(
        services::sync::server_config_versions(&state, &caller, None).await?,
    ))
}

pub(crate) async fn create_node_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<ClusterMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageCreated>)> {
    let created = services::messages::create_cluster_message(&state, &caller, body).await?;
    let status = if created.message_id.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(created)))
}

pub(crate) async fn upload_http_stats(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(upload): Json<HttpRequestStatUpload>,
) -> ApiResult<StatusCode> {
    services::stats::upload_http_request_stats(&state, &caller, upload).await?;
    Ok(StatusCode::ACCEPTED)
}
