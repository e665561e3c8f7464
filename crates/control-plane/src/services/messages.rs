use chrono::Utc;
use common::api::{MessageTaskStatus, MessageType, Page, ReceiverType};
use serde::{Deserialize, Serialize};

use crate::{
    app_state::AppState,
    auth::Caller,
    error::{invalid_argument, not_found, permission_denied, require_id, ApiResult},
    messaging::{self, Notice},
    persistence::{
        message_receivers::{self, MessageReceiverRecord, NewMessageReceiver, ReceiverScope},
        message_tasks::{self, MessageTaskRecord},
        messages::{self, MessageFilter, MessageRecord},
    },
    services::page_limit,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMessageRequest {
    /// Target user; zero addresses the administrator inbox.
    #[serde(default)]
    pub user_id: i64,
    #[serde(flatten)]
    pub notice: Notice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterMessageRequest {
    /// Ignored for node callers, which are pinned to their own cluster.
    #[serde(default)]
    pub cluster_id: i64,
    #[serde(default)]
    pub node_id: i64,
    #[serde(flatten)]
    pub notice: Notice,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageCreated {
    /// Absent when an identical node message was suppressed.
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMessagesRequest {
    #[serde(default, rename = "type")]
    pub kind: Option<MessageType>,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverRequest {
    #[serde(rename = "type")]
    pub kind: ReceiverType,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    #[serde(default)]
    pub recipient_id: i64,
    #[serde(default)]
    pub recipient_group_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateReceiversRequest {
    #[serde(flatten)]
    pub scope: ReceiverScope,
    pub receivers: Vec<ReceiverRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMessageTaskRequest {
    pub status: MessageTaskStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Inbox owner seen by `caller`: zero for administrators.
fn inbox_owner(caller: &Caller) -> crate::Result<i64> {
    match caller {
        Caller::Admin { .. } => Ok(0),
        Caller::User { id } => Ok(*id),
        Caller::Node { .. } => Err(permission_denied("nodes have no inbox")),
    }
}

fn validate_notice(notice: &Notice, max_len: usize) -> crate::Result<()> {
    if notice.subject.trim().is_empty() {
        return Err(invalid_argument("subject cannot be empty"));
    }
    if notice.body.len() > max_len * 64 {
        return Err(invalid_argument("body too long"));
    }
    Ok(())
}

fn validate_scope(scope: &ReceiverScope) -> crate::Result<()> {
    require_id(scope.cluster_id, "cluster")?;
    if scope.node_id < 0 || scope.server_id < 0 {
        return Err(invalid_argument("receiver scope ids must not be negative"));
    }
    Ok(())
}

pub async fn create_message(
    state: &AppState,
    caller: &Caller,
    req: CreateMessageRequest,
) -> ApiResult<MessageCreated> {
    let admin_id = caller.require_admin()?;
    validate_notice(&req.notice, state.limits.max_field_len)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let id =
        messaging::create_message(&mut tx, admin_id, req.user_id.max(0), &req.notice, Utc::now())
            .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(MessageCreated {
        message_id: Some(id),
    })
}

/// Cluster or node message. A node id selects the deduplicated node path.
pub async fn create_cluster_message(
    state: &AppState,
    caller: &Caller,
    req: ClusterMessageRequest,
) -> ApiResult<MessageCreated> {
    let (cluster_id, node_id) = match caller {
        Caller::Admin { .. } => (req.cluster_id, req.node_id),
        Caller::Node {
            cluster_id,
            node_id,
        } => (*cluster_id, *node_id),
        Caller::User { .. } => {
            return Err(permission_denied("users cannot raise cluster messages").into())
        }
    };
    require_id(cluster_id, "cluster")?;
    validate_notice(&req.notice, state.limits.max_field_len)?;

    let now = Utc::now();
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let message_id = if node_id > 0 {
        messaging::create_node_message(
            &mut tx,
            &state.messaging,
            cluster_id,
            node_id,
            &req.notice,
            now,
        )
        .await?
    } else {
        Some(messaging::create_cluster_message(&mut tx, cluster_id, &req.notice, now).await?)
    };
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(MessageCreated { message_id })
}

fn filter_for(caller: &Caller, req: &ListMessagesRequest) -> crate::Result<MessageFilter> {
    Ok(MessageFilter {
        user_id: inbox_owner(caller)?,
        kind: req.kind,
        unread_only: req.unread_only,
    })
}

pub async fn list_messages(
    state: &AppState,
    caller: &Caller,
    req: &ListMessagesRequest,
) -> ApiResult<Page<MessageRecord>> {
    let filter = filter_for(caller, req)?;
    let limit = page_limit(req.limit, state.limits.list_limit);
    let offset = req.offset.unwrap_or(0);
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let items = messages::list_messages(&mut conn, &filter, limit, offset).await?;
    Ok(Page {
        limit,
        offset,
        items,
    })
}

pub async fn count_unread_messages(
    state: &AppState,
    caller: &Caller,
    kind: Option<MessageType>,
) -> ApiResult<i64> {
    let filter = MessageFilter {
        user_id: inbox_owner(caller)?,
        kind,
        unread_only: true,
    };
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(messages::count_messages(&mut conn, &filter).await?)
}

pub async fn mark_read(state: &AppState, caller: &Caller, message_id: i64) -> ApiResult<()> {
    require_id(message_id, "message")?;
    let owner = inbox_owner(caller)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let message = messages::get_enabled_message(&mut tx, message_id)
        .await?
        .ok_or_else(|| not_found("message"))?;
    if message.user_id != owner {
        return Err(permission_denied("message belongs to another inbox").into());
    }
    messages::mark_message_read(&mut tx, message_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn mark_all_read(state: &AppState, caller: &Caller) -> ApiResult<u64> {
    let owner = inbox_owner(caller)?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(messages::mark_all_read(&mut conn, owner).await?)
}

fn new_receiver(scope: ReceiverScope, req: ReceiverRequest) -> crate::Result<NewMessageReceiver> {
    let params_json = match req.params {
        Some(value) if !value.is_null() => Some(serde_json::to_string(&value)?),
        _ => None,
    };
    Ok(NewMessageReceiver {
        scope,
        kind: req.kind,
        params_json,
        recipient_id: req.recipient_id.max(0),
        recipient_group_id: req.recipient_group_id.max(0),
    })
}

pub async fn create_receiver(
    state: &AppState,
    caller: &Caller,
    scope: ReceiverScope,
    req: ReceiverRequest,
) -> ApiResult<i64> {
    caller.require_admin()?;
    validate_scope(&scope)?;
    let receiver = new_receiver(scope, req)?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(message_receivers::create_receiver(&mut conn, receiver).await?)
}

/// Replace every receiver of a scope with the submitted list.
pub async fn update_receivers(
    state: &AppState,
    caller: &Caller,
    req: UpdateReceiversRequest,
) -> ApiResult<usize> {
    caller.require_admin()?;
    validate_scope(&req.scope)?;
    let receivers = req
        .receivers
        .into_iter()
        .map(|receiver| new_receiver(req.scope, receiver))
        .collect::<crate::Result<Vec<_>>>()?;

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    message_receivers::disable_receivers(&mut tx, req.scope).await?;
    let count = receivers.len();
    for receiver in receivers {
        message_receivers::create_receiver(&mut tx, receiver).await?;
    }
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(count)
}

pub async fn list_enabled_receivers(
    state: &AppState,
    caller: &Caller,
    scope: ReceiverScope,
    kind: Option<MessageType>,
) -> ApiResult<Vec<MessageReceiverRecord>> {
    caller.require_admin()?;
    validate_scope(&scope)?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(message_receivers::list_enabled_receivers(&mut conn, scope, kind).await?)
}

pub async fn count_enabled_receivers(
    state: &AppState,
    caller: &Caller,
    scope: ReceiverScope,
    kind: Option<MessageType>,
) -> ApiResult<i64> {
    caller.require_admin()?;
    validate_scope(&scope)?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(message_receivers::count_enabled_receivers(&mut conn, scope, kind).await?)
}

pub async fn disable_receivers(
    state: &AppState,
    caller: &Caller,
    scope: ReceiverScope,
) -> ApiResult<u64> {
    caller.require_admin()?;
    validate_scope(&scope)?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(message_receivers::disable_receivers(&mut conn, scope).await?)
}

pub async fn list_pending_message_tasks(
    state: &AppState,
    caller: &Caller,
    limit: Option<u32>,
) -> ApiResult<Vec<MessageTaskRecord>> {
    caller.require_admin()?;
    let limit = page_limit(limit, state.limits.list_limit);
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(message_tasks::list_pending_message_tasks(&mut conn, limit).await?)
}

/// Record delivery progress. `sent_at` is stamped on terminal states.
pub async fn update_message_task_status(
    state: &AppState,
    caller: &Caller,
    task_id: i64,
    req: UpdateMessageTaskRequest,
) -> ApiResult<()> {
    caller.require_admin()?;
    require_id(task_id, "message task")?;
    let result_json = req
        .result
        .filter(|value| !value.is_null())
        .map(|value| serde_json::to_string(&value))
        .transpose()
        .map_err(anyhow::Error::from)?;
    let sent_at = match req.status {
        MessageTaskStatus::Success | MessageTaskStatus::Failed => Utc::now().timestamp(),
        _ => 0,
    };
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let updated = message_tasks::update_message_task_status(
        &mut conn,
        task_id,
        req.status,
        result_json.as_deref(),
        sent_at,
    )
    .await?;
    if updated == 0 {
        return Err(not_found("message task").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{seed_cluster, setup_state};
    use axum::http::StatusCode;
    use common::api::MessageLevel;

    const ADMIN: Caller = Caller::Admin { id: 1 };
    const USER: Caller = Caller::User { id: 7 };

    fn notice(subject: &str) -> Notice {
        Notice::new(
            MessageType::HealthCheckFailed,
            MessageLevel::Error,
            subject,
            "node unreachable",
        )
    }

    #[tokio::test]
    async fn node_messages_are_deduplicated_and_fanned_out() {
        let state = setup_state().await;
        let cluster_id = {
            let mut conn = state.db.acquire().await.expect("conn");
            seed_cluster(&mut conn, "edge").await
        };
        let count = update_receivers(
            &state,
            &ADMIN,
            UpdateReceiversRequest {
                scope: ReceiverScope::cluster(cluster_id),
                receivers: vec![
                    ReceiverRequest {
                        kind: ReceiverType::Any,
                        params: None,
                        recipient_id: 1,
                        recipient_group_id: 0,
                    },
                    ReceiverRequest {
                        kind: ReceiverType::Specific(MessageType::HealthCheckNodeUp),
                        params: None,
                        recipient_id: 2,
                        recipient_group_id: 0,
                    },
                ],
            },
        )
        .await
        .expect("receivers");
        assert_eq!(count, 2);

        let node = Caller::Node {
            cluster_id,
            node_id: 3,
        };
        let first = create_cluster_message(
            &state,
            &node,
            ClusterMessageRequest {
                cluster_id: 0,
                node_id: 0,
                notice: notice("node down"),
            },
        )
        .await
        .expect("first");
        assert!(first.message_id.is_some());
        let second = create_cluster_message(
            &state,
            &node,
            ClusterMessageRequest {
                cluster_id: 0,
                node_id: 0,
                notice: notice("node down"),
            },
        )
        .await
        .expect("second");
        assert!(second.message_id.is_none());

        let pending = list_pending_message_tasks(&state, &ADMIN, None)
            .await
            .expect("tasks");
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_primary);

        update_message_task_status(
            &state,
            &ADMIN,
            pending[0].id,
            UpdateMessageTaskRequest {
                status: MessageTaskStatus::Success,
                result: Some(serde_json::json!({"ok": true})),
            },
        )
        .await
        .expect("status");
        assert!(list_pending_message_tasks(&state, &ADMIN, None)
            .await
            .expect("tasks")
            .is_empty());

        let page = list_messages(&state, &ADMIN, &ListMessagesRequest::default())
            .await
            .expect("admin inbox");
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn inboxes_are_separated() {
        let state = setup_state().await;
        let created = create_message(
            &state,
            &ADMIN,
            CreateMessageRequest {
                user_id: 7,
                notice: notice("for the user"),
            },
        )
        .await
        .expect("create");
        let message_id = created.message_id.expect("stored");

        assert_eq!(
            count_unread_messages(&state, &USER, None)
                .await
                .expect("count"),
            1
        );
        assert_eq!(
            count_unread_messages(&state, &ADMIN, None)
                .await
                .expect("count"),
            0
        );

        let err = mark_read(&state, &ADMIN, message_id)
            .await
            .expect_err("foreign inbox");
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        mark_read(&state, &USER, message_id).await.expect("read");
        assert_eq!(
            count_unread_messages(&state, &USER, Some(MessageType::HealthCheckFailed))
                .await
                .expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn users_cannot_create_or_route_messages() {
        let state = setup_state().await;
        let err = create_message(
            &state,
            &USER,
            CreateMessageRequest {
                user_id: 0,
                notice: notice("nope"),
            },
        )
        .await
        .expect_err("user");
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let err = disable_receivers(&state, &ADMIN, ReceiverScope::default())
            .await
            .expect_err("scope");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
