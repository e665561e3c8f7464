use super::*;
use crate::persistence::{
    message_receivers::{MessageReceiverRecord, ReceiverScope},
    message_tasks::MessageTaskRecord,
    messages::MessageRecord,
};
use common::api::{MessageType, Page};
use crate::services::messages::{
    ClusterMessageRequest, CreateMessageRequest, ListMessagesRequest, MessageCreated,
    ReceiverRequest, UpdateMessageTaskRequest, UpdateReceiversRequest,
};

pub fn router(state: AppState) -> Router<AppState> {
    let routes = Router::<AppState>::new()
        .route("/api/v1/messages", post(create_message).get(list_messages))
        .route("/api/v1/messages/cluster", post(create_cluster_message))
        .route("/api/v1/messages/unread-count", get(count_unread))
        .route("/api/v1/messages/read-all", put(mark_all_read))
        .route("/api/v1/messages/{message_id}/read", put(mark_read))
        .route(
            "/api/v1/message-receivers",
            get(list_receivers)
                .post(create_receiver)
                .put(update_receivers)
                .delete(disable_receivers),
        )
        .route("/api/v1/message-receivers/count", get(count_receivers))
        .route("/api/v1/message-tasks", get(list_pending_tasks))
        .route("/api/v1/message-tasks/{task_id}", put(update_task_status));
    caller_routes(state, routes)
}

/// Receiver scope in query form.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReceiverQuery {
    #[serde(default)]
    cluster_id: i64,
    #[serde(default)]
    node_id: i64,
    #[serde(default)]
    server_id: i64,
    #[serde(default, rename = "type")]
    kind: Option<MessageType>,
}

impl ReceiverQuery {
    fn scope(&self) -> ReceiverScope {
        ReceiverScope {
            cluster_id: self.cluster_id,
            node_id: self.node_id,
            server_id: self.server_id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TypeParams {
    #[serde(default, rename = "type")]
    kind: Option<MessageType>,
}

pub(crate) async fn create_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<CreateMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageCreated>)> {
    let created = services::messages::create_message(&state, &caller, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn create_cluster_message(
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

pub(crate) async fn list_messages(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ListMessagesRequest>,
) -> ApiResult<Json<Page<MessageRecord>>> {
    Ok(Json(
        services::messages::list_messages(&state, &caller, &params).await?,
    ))
}

pub(crate) async fn count_unread(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<TypeParams>,
) -> ApiResult<Json<CountResponse>> {
    let count = services::messages::count_unread_messages(&state, &caller, params.kind).await?;
    Ok(Json(CountResponse { count }))
}

pub(crate) async fn mark_read(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(message_id): Path<i64>,
) -> ApiResult<StatusCode> {
    services::messages::mark_read(&state, &caller, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn mark_all_read(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<CountResponse>> {
    let count = services::messages::mark_all_read(&state, &caller).await?;
    Ok(Json(CountResponse {
        count: count as i64,
    }))
}

pub(crate) async fn list_receivers(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ReceiverQuery>,
) -> ApiResult<Json<Vec<MessageReceiverRecord>>> {
    Ok(Json(
        services::messages::list_enabled_receivers(&state, &caller, params.scope(), params.kind)
            .await?,
    ))
}

pub(crate) async fn count_receivers(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ReceiverQuery>,
) -> ApiResult<Json<CountResponse>> {
    let count =
        services::messages::count_enabled_receivers(&state, &caller, params.scope(), params.kind)
            .await?;
    Ok(Json(CountResponse { count }))
}

pub(crate) async fn create_receiver(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ReceiverQuery>,
    Json(body): Json<ReceiverRequest>,
) -> ApiResult<(StatusCode, Json<IdResponse>)> {
    let id = services::messages::create_receiver(&state, &caller, params.scope(), body).await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

pub(crate) async fn update_receivers(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<UpdateReceiversRequest>,
) -> ApiResult<Json<CountResponse>> {
    let count = services::messages::update_receivers(&state, &caller, body).await?;
    Ok(Json(CountResponse {
        count: count as i64,
    }))
}

pub(crate) async fn disable_receivers(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ReceiverQuery>,
) -> ApiResult<Json<CountResponse>> {
    let count = services::messages::disable_receivers(&state, &caller, params.scope()).await?;
    Ok(Json(CountResponse {
        count: count as i64,
    }))
}

pub(crate) async fn list_pending_tasks(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Vec<MessageTaskRecord>>> {
    Ok(Json(
        services::messages::list_pending_message_tasks(&state, &caller, params.limit).await?,
    ))
}

pub(crate) async fn update_task_status(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(task_id): Path<i64>,
    Json(body): Json<UpdateMessageTaskRequest>,
) -> ApiResult<StatusCode> {
    services::messages::update_message_task_status(&state, &caller, task_id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}
