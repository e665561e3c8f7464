use super::*;
use crate::{auditing::NamesState, error::invalid_argument, persistence::servers::ProtocolColumn};
use common::{
    api::Page,
    config::{GlobalServerConfig, ServerConfig},
};
use serde_json::Value;
use crate::services::stats::ListStatsRequest;
use crate::services::servers::{
    CreateServerRequest, ListServersRequest, ReviewServerNamesRequest, ServerCreated,
    ServerDnsView, ServerNamesView, UpdateServerBasicRequest,
};

pub fn router(state: AppState) -> Router<AppState> {
    let routes = Router::<AppState>::new()
        .route("/api/v1/servers", post(create_server).get(list_servers))
        .route("/api/v1/servers/count", get(count_servers))
        .route("/api/v1/servers/duplicate-names", post(duplicate_names))
        .route("/api/v1/servers/notify-change", post(notify_change))
        .route(
            "/api/v1/servers/{server_id}",
            put(update_server_basic).delete(disable_server),
        )
        .route("/api/v1/servers/{server_id}/name", put(update_user_server_name))
        .route("/api/v1/servers/{server_id}/is-on", put(update_is_on))
        .route(
            "/api/v1/servers/{server_id}/protocols/{protocol}",
            put(update_protocol),
        )
        .route("/api/v1/servers/{server_id}/web", put(update_web))
        .route(
            "/api/v1/servers/{server_id}/reverse-proxy",
            put(update_reverse_proxy),
        )
        .route(
            "/api/v1/servers/{server_id}/server-names",
            get(find_server_names).put(update_server_names),
        )
        .route(
            "/api/v1/servers/{server_id}/server-names/review",
            post(review_server_names),
        )
        .route("/api/v1/servers/{server_id}/config", get(find_server_config))
        .route("/api/v1/servers/{server_id}/dns", get(find_server_dns))
        .route("/api/v1/servers/{server_id}/stats", get(list_server_stats))
        .route(
            "/api/v1/servers/{server_id}/dns-name/regenerate",
            post(regenerate_dns_name),
        )
        .route(
            "/api/v1/settings/server-global",
            get(read_global_config).put(update_global_config),
        );
    caller_routes(state, routes)
}

#[derive(Debug, Deserialize)]
pub(crate) struct NameBody {
    name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IsOnBody {
    is_on: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebBody {
    web_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DuplicateNamesBody {
    cluster_id: i64,
    names: Vec<String>,
    #[serde(default)]
    exclude_server_id: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct DuplicateNamesResponse {
    duplicates: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NamesStateResponse {
    state: NamesState,
}

#[derive(Debug, Serialize)]
pub(crate) struct DnsNameResponse {
    dns_name: String,
}

fn protocol_column(raw: &str) -> crate::Result<ProtocolColumn> {
    match raw {
        "http" => Ok(ProtocolColumn::Http),
        "https" => Ok(ProtocolColumn::Https),
        "tcp" => Ok(ProtocolColumn::Tcp),
        "tls" => Ok(ProtocolColumn::Tls),
        "unix" => Ok(ProtocolColumn::Unix),
        "udp" => Ok(ProtocolColumn::Udp),
        other => Err(invalid_argument(format!("unknown protocol: {other}"))),
    }
}

pub(crate) async fn create_server(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<CreateServerRequest>,
) -> ApiResult<(StatusCode, Json<ServerCreated>)> {
    let created = services::servers::create_server(&state, &caller, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn list_servers(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ListServersRequest>,
) -> ApiResult<Json<Page<crate::persistence::servers::ServerListRow>>> {
    Ok(Json(
        services::servers::list_servers_match(&state, &caller, &params).await?,
    ))
}

pub(crate) async fn count_servers(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ListServersRequest>,
) -> ApiResult<Json<CountResponse>> {
    let count = services::servers::count_servers_match(&state, &caller, &params).await?;
    Ok(Json(CountResponse { count }))
}

pub(crate) async fn duplicate_names(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<DuplicateNamesBody>,
) -> ApiResult<Json<DuplicateNamesResponse>> {
    let duplicates = services::servers::check_server_name_duplication(
        &state,
        &caller,
        body.cluster_id,
        &body.names,
        body.exclude_server_id,
    )
    .await?;
    Ok(Json(DuplicateNamesResponse { duplicates }))
}

pub(crate) async fn notify_change(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<CountResponse>> {
    let clusters = services::servers::notify_servers_change(&state, &caller).await?;
    Ok(Json(CountResponse {
        count: clusters as i64,
    }))
}

pub(crate) async fn update_server_basic(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
    Json(body): Json<UpdateServerBasicRequest>,
) -> ApiResult<StatusCode> {
    services::servers::update_server_basic(&state, &caller, server_id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn disable_server(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
) -> ApiResult<StatusCode> {
    services::servers::disable_server(&state, &caller, server_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_user_server_name(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
    Json(body): Json<NameBody>,
) -> ApiResult<StatusCode> {
    services::servers::update_user_server_basic(&state, &caller, server_id, &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_is_on(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
    Json(body): Json<IsOnBody>,
) -> ApiResult<StatusCode> {
    services::servers::update_server_is_on(&state, &caller, server_id, body.is_on).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_protocol(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((server_id, protocol)): Path<(i64, String)>,
    Json(body): Json<Option<Value>>,
) -> ApiResult<StatusCode> {
    let column = protocol_column(&protocol)?;
    services::servers::update_server_protocol(&state, &caller, server_id, column, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_web(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
    Json(body): Json<WebBody>,
) -> ApiResult<StatusCode> {
    services::servers::update_server_web(&state, &caller, server_id, body.web_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn update_reverse_proxy(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
    Json(body): Json<Option<Value>>,
) -> ApiResult<StatusCode> {
    services::servers::update_server_reverse_proxy(&state, &caller, server_id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn find_server_names(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
) -> ApiResult<Json<ServerNamesView>> {
    Ok(Json(
        services::servers::find_server_names(&state, &caller, server_id).await?,
    ))
}

pub(crate) async fn update_server_names(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
    Json(body): Json<Option<Value>>,
) -> ApiResult<Json<NamesStateResponse>> {
    let names_state =
        services::servers::update_server_names(&state, &caller, server_id, body).await?;
    Ok(Json(NamesStateResponse { state: names_state }))
}

pub(crate) async fn review_server_names(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
    Json(body): Json<ReviewServerNamesRequest>,
) -> ApiResult<Json<NamesStateResponse>> {
    let names_state =
        services::servers::review_server_names(&state, &caller, server_id, body).await?;
    Ok(Json(NamesStateResponse { state: names_state }))
}

pub(crate) async fn find_server_config(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
) -> ApiResult<Json<ServerConfig>> {
    Ok(Json(
        services::servers::find_server_config(&state, &caller, server_id).await?,
    ))
}

pub(crate) async fn find_server_dns(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
) -> ApiResult<Json<ServerDnsView>> {
    Ok(Json(
        services::servers::find_server_dns(&state, &caller, server_id).await?,
    ))
}

pub(crate) async fn list_server_stats(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
    Query(params): Query<ListStatsRequest>,
) -> ApiResult<Json<Vec<crate::persistence::stats::HttpStatRow>>> {
    Ok(Json(
        services::stats::list_server_stats(&state, &caller, server_id, &params).await?,
    ))
}

pub(crate) async fn regenerate_dns_name(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(server_id): Path<i64>,
) -> ApiResult<Json<DnsNameResponse>> {
    let dns_name =
        services::servers::regenerate_server_dns_name(&state, &caller, server_id).await?;
    Ok(Json(DnsNameResponse { dns_name }))
}

pub(crate) async fn read_global_config(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<GlobalServerConfig>> {
    Ok(Json(
        services::settings::read_server_global_config(&state, &caller).await?,
    ))
}

pub(crate) async fn update_global_config(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<Value>,
) -> ApiResult<Json<CountResponse>> {
    let clusters = services::settings::update_server_global_config(&state, &caller, body).await?;
    Ok(Json(CountResponse {
        count: clusters as i64,
    }))
}
