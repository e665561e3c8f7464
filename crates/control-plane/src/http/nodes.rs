use super::*;
use crate::persistence::{ip_addresses::IpAddressRecord, nodes::NodeRecord};
use crate::services::nodes::{CreateAddressRequest, NodeCreated, NodeRequest, UpdateAddressRequest};

pub fn router(state: AppState) -> Router<AppState> {
    let routes = Router::<AppState>::new()
        .route("/api/v1/nodes", post(create_node))
        .route(
            "/api/v1/nodes/{node_id}",
            put(update_node).delete(disable_node),
        )
        .route("/api/v1/clusters/{cluster_id}/nodes", get(list_cluster_nodes))
        .route(
            "/api/v1/nodes/{node_id}/addresses",
            get(list_addresses).delete(disable_node_addresses),
        )
        .route("/api/v1/nodes/{node_id}/access-ip", get(first_access_ip))
        .route("/api/v1/addresses", post(create_address))
        .route(
            "/api/v1/addresses/{address_id}",
            put(update_address).delete(disable_address),
        )
        .route("/api/v1/addresses/{address_id}/ip", put(update_address_ip))
        .route(
            "/api/v1/addresses/{address_id}/node",
            put(update_address_node),
        );
    caller_routes(state, routes)
}

#[derive(Debug, Deserialize)]
pub(crate) struct IpBody {
    ip: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NodeBody {
    node_id: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct AccessIpResponse {
    ip: Option<String>,
}

pub(crate) async fn create_node(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<NodeRequest>,
) -> ApiResult<(StatusCode, Json<NodeCreated>)> {
    let created = services::nodes::create_node(&state, &caller, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn update_node(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(node_id): Path<i64>,
    Json(body): Json<NodeRequest>,
) -> ApiResult<StatusCode> {
    services::nodes::update_node(&state, &caller, node_id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn disable_node(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(node_id): Path<i64>,
) -> ApiResult<StatusCode> {
    services::nodes::disable_node(&state, &caller, node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_cluster_nodes(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(cluster_id): Path<i64>,
) -> ApiResult<Json<Vec<NodeRecord>>> {
    Ok(Json(
        services::nodes::list_cluster_nodes(&state, &caller, cluster_id).await?,
    ))
}

pub(crate) async fn list_addresses(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(node_id): Path<i64>,
    Query(params): Query<RoleParams>,
) -> ApiResult<Json<Vec<IpAddressRecord>>> {
    Ok(Json(
        services::nodes::list_enabled_addresses(&state, &caller, node_id, params.role.as_deref())
            .await?,
    ))
}

pub(crate) async fn disable_node_addresses(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(node_id): Path<i64>,
    Query(params): Query<RoleParams>,
) -> ApiResult<Json<CountResponse>> {
    let disabled = services::nodes::disable_all_addresses_with_node(
        &state,
        &caller,
        node_id,
        params.role.as_deref(),
    )
    .await?;
    Ok(Json(CountResponse {
        count: disabled as i64,
    }))
}

pub(crate) async fn first_access_ip(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(node_id): Path<i64>,
    Query(params): Query<RoleParams>,
) -> ApiResult<Json<AccessIpResponse>> {
    let ip =
        services::nodes::find_first_access_ip(&state, &caller, node_id, params.role.as_deref())
            .await?;
    Ok(Json(AccessIpResponse { ip }))
}

pub(crate) async fn create_address(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<CreateAddressRequest>,
) -> ApiResult<(StatusCode, Json<IdResponse>)> {
    let id = services::nodes::create_address(&state, &caller, body).await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

pub(crate) async fn update_address(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(address_id): Path<i64>,
    Json(body): Json<UpdateAddressRequest>,
) -> ApiResult<StatusCode> {
    services::nodes::update_address(&state, &caller, address_id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn disable_address(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(address_id): Path<i64>,
) -> ApiResult<StatusCode> {
    services::nodes::disable_address(&state, &caller, address_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_address_ip(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(address_id): Path<i64>,
    Json(body): Json<IpBody>,
) -> ApiResult<StatusCode> {
    services::nodes::update_address_ip(&state, &caller, address_id, &body.ip).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_address_node(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(address_id): Path<i64>,
    Json(body): Json<NodeBody>,
) -> ApiResult<StatusCode> {
    services::nodes::update_address_node(&state, &caller, address_id, body.node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
