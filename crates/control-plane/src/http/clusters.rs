use super::*;
use crate::persistence::servers::ServerDnsRecord;
use common::{
    api::{DnsTaskPage, ServerConfigItem, ServerConfigVersion, TaskAckRequest, TaskAckResponse},
    config::{HealthCheckConfig, ToaConfig},
};
use crate::services::clusters::{
    ClusterCreated, ClusterDnsView, CreateClusterRequest, UpdateClusterDnsRequest,
};

pub fn router(state: AppState) -> Router<AppState> {
    let routes = Router::<AppState>::new()
        .route("/api/v1/clusters", post(create_cluster))
        .route(
            "/api/v1/clusters/{cluster_id}",
            put(update_cluster).delete(disable_cluster),
        )
        .route(
            "/api/v1/clusters/{cluster_id}/health-check",
            put(update_health_check),
        )
        .route("/api/v1/clusters/{cluster_id}/toa", put(update_toa))
        .route(
            "/api/v1/clusters/{cluster_id}/cache-policy",
            put(update_cache_policy),
        )
        .route(
            "/api/v1/clusters/{cluster_id}/firewall-policy",
            put(update_firewall_policy),
        )
        .route(
            "/api/v1/clusters/{cluster_id}/system-services/{service_type}",
            put(update_system_service),
        )
        .route(
            "/api/v1/clusters/{cluster_id}/dns",
            get(find_cluster_dns).put(update_cluster_dns),
        )
        .route(
            "/api/v1/clusters/{cluster_id}/servers/dns",
            get(list_cluster_servers_dns),
        )
        .route(
            "/api/v1/clusters/{cluster_id}/server-configs",
            get(cluster_server_configs),
        )
        .route(
            "/api/v1/clusters/{cluster_id}/server-configs/versions",
            get(cluster_server_config_versions),
        )
        .route(
            "/api/v1/users/{user_id}/cluster",
            put(update_user_servers_cluster),
        )
        .route("/api/v1/dns/tasks", get(poll_dns_tasks))
        .route("/api/v1/dns/tasks/ack", post(ack_dns_tasks));
    caller_routes(state, routes)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClusterNameBody {
    name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PolicyBody {
    policy_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserClusterBody {
    cluster_id: i64,
}

pub(crate) async fn create_cluster(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<CreateClusterRequest>,
) -> ApiResult<(StatusCode, Json<ClusterCreated>)> {
    let created = services::clusters::create_cluster(&state, &caller, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn update_cluster(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
    Json(body): Json<ClusterNameBody>,
) -> ApiResult<StatusCode> {
    services::clusters::update_cluster(&state, &caller, cluster_id, &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn disable_cluster(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
) -> ApiResult<StatusCode> {
    services::clusters::disable_cluster(&state, &caller, cluster_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_health_check(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
    Json(body): Json<HealthCheckConfig>,
) -> ApiResult<StatusCode> {
    services::clusters::update_cluster_health_check(&state, &caller, cluster_id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_toa(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
    Json(body): Json<ToaConfig>,
) -> ApiResult<StatusCode> {
    services::clusters::update_cluster_toa(&state, &caller, cluster_id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_cache_policy(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
    Json(body): Json<PolicyBody>,
) -> ApiResult<StatusCode> {
    services::clusters::update_cluster_cache_policy(&state, &caller, cluster_id, body.policy_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_firewall_policy(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
    Json(body): Json<PolicyBody>,
) -> ApiResult<StatusCode> {
    services::clusters::update_cluster_firewall_policy(&state, &caller, cluster_id, body.policy_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_system_service(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((cluster_id, service_type)): Path<(i64, String)>,
    Json(params): Json<serde_json::Value>,
) -> ApiResult<StatusCode> {
    services::clusters::update_cluster_system_service(
        &state,
        &caller,
        cluster_id,
        &service_type,
        params,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn find_cluster_dns(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
) -> ApiResult<Json<ClusterDnsView>> {
    Ok(Json(
        services::clusters::find_cluster_dns(&state, &caller, cluster_id).await?,
    ))
}

pub(crate) async fn update_cluster_dns(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
    Json(body): Json<UpdateClusterDnsRequest>,
) -> ApiResult<Json<CountResponse>> {
    let renewed = services::clusters::update_cluster_dns(&state, &caller, cluster_id, body).await?;
    Ok(Json(CountResponse {
        count: renewed as i64,
    }))
}

pub(crate) async fn list_cluster_servers_dns(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
) -> ApiResult<Json<Vec<ServerDnsRecord>>> {
    Ok(Json(
        services::servers::find_all_servers_dns_with_cluster(&state, &caller, cluster_id).await?,
    ))
}

pub(crate) async fn cluster_server_configs(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
) -> ApiResult<Json<Vec<ServerConfigItem>>> {
    Ok(Json(
        services::sync::cluster_server_configs(&state, &caller, Some(cluster_id)).await?,
    ))
}

pub(crate) async fn cluster_server_config_versions(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
) -> ApiResult<Json<Vec<ServerConfigVersion>>> {
    Ok(Json(
        services::sync::server_config_versions(&state, &caller, Some(cluster_id)).await?,
    ))
}

pub(crate) async fn update_user_servers_cluster(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(user_id): Path<i64>,
    Json(body): Json<UserClusterBody>,
) -> ApiResult<Json<CountResponse>> {
    let moved =
        services::clusters::update_user_servers_cluster(&state, &caller, user_id, body.cluster_id)
            .await?;
    Ok(Json(CountResponse {
        count: moved as i64,
    }))
}

pub(crate) async fn poll_dns_tasks(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<DnsTaskPage>> {
    Ok(Json(
        services::sync::poll_dns_tasks(&state, &caller, params.limit).await?,
    ))
}

pub(crate) async fn ack_dns_tasks(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<TaskAckRequest>,
) -> ApiResult<Json<TaskAckResponse>> {
    Ok(Json(
        services::sync::ack_dns_tasks(&state, &caller, body.last_task_id).await?,
    ))
}
