//! Task and config pulls for edge nodes and the DNS synchroniser.
//!
//! Consumers poll tasks newer than their cursor, apply them by re-deriving
//! state (pulling configs or resyncing records) and then ack the highest id
//! they applied. Tasks carry no payload, so applying one twice is harmless.

use common::api::{
    DnsTaskPage, NodeTask, NodeTaskPage, ServerConfigItem, ServerConfigVersion, TaskAckResponse,
};
use tracing::debug;

use crate::{
    app_state::AppState,
    auth::Caller,
    composer,
    error::{invalid_argument, malformed, permission_denied, require_id, ApiResult},
    persistence::{
        dns_tasks, node_tasks, servers,
        task_cursors::{self, TaskStream},
    },
    services::page_limit,
};

/// Cluster a caller may pull for. Nodes are pinned to their own cluster.
fn cluster_for(caller: &Caller, requested: Option<i64>) -> crate::Result<i64> {
    let cluster_id = match caller {
        Caller::Node { cluster_id, .. } => *cluster_id,
        Caller::Admin { .. } => requested.unwrap_or_default(),
        Caller::User { .. } => return Err(permission_denied("users cannot pull node state")),
    };
    require_id(cluster_id, "cluster")?;
    Ok(cluster_id)
}

fn require_node(caller: &Caller) -> crate::Result<(i64, i64)> {
    match caller {
        Caller::Node {
            cluster_id,
            node_id,
        } => Ok((*cluster_id, *node_id)),
        _ => Err(permission_denied("node credentials required")),
    }
}

pub async fn poll_tasks(
    state: &AppState,
    caller: &Caller,
    limit: Option<u32>,
) -> ApiResult<NodeTaskPage> {
    let (cluster_id, node_id) = require_node(caller)?;
    let consumer = caller.consumer_key();
    let limit = page_limit(limit, state.limits.task_poll_limit);

    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let cursor = task_cursors::get_cursor(&mut conn, &consumer, TaskStream::Node).await?;
    let tasks: Vec<NodeTask> =
        node_tasks::list_tasks_after(&mut conn, cluster_id, node_id, cursor, limit)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
    debug!(consumer = %consumer, cursor, count = tasks.len(), "node tasks polled");
    Ok(NodeTaskPage { cursor, tasks })
}

pub async fn ack_tasks(
    state: &AppState,
    caller: &Caller,
    last_task_id: i64,
) -> ApiResult<TaskAckResponse> {
    require_node(caller)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    if last_task_id < 0 || last_task_id > node_tasks::max_task_id(&mut tx).await? {
        return Err(invalid_argument(format!("unknown task id: {last_task_id}")).into());
    }
    let cursor = task_cursors::advance_cursor(
        &mut tx,
        &caller.consumer_key(),
        TaskStream::Node,
        last_task_id,
    )
    .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(TaskAckResponse { cursor })
}

/// Cached configs of every enabled server of the cluster.
pub async fn cluster_server_configs(
    state: &AppState,
    caller: &Caller,
    cluster_id: Option<i64>,
) -> ApiResult<Vec<ServerConfigItem>> {
    let cluster_id = cluster_for(caller, cluster_id)?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let rows = servers::list_cluster_server_configs(&mut conn, cluster_id).await?;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let config = match row.config_json.as_deref() {
            Some(raw) if composer::is_present(Some(raw)) => Some(
                serde_json::from_str(raw).map_err(|err| malformed("server config", err))?,
            ),
            _ => None,
        };
        items.push(ServerConfigItem {
            server_id: row.id,
            version: row.version,
            config,
        });
    }
    Ok(items)
}

pub async fn server_config_versions(
    state: &AppState,
    caller: &Caller,
    cluster_id: Option<i64>,
) -> ApiResult<Vec<ServerConfigVersion>> {
    let cluster_id = cluster_for(caller, cluster_id)?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let rows = servers::list_cluster_server_configs(&mut conn, cluster_id).await?;
    Ok(rows
        .into_iter()
        .map(|row| ServerConfigVersion {
            server_id: row.id,
            version: row.version,
        })
        .collect())
}

pub async fn poll_dns_tasks(
    state: &AppState,
    caller: &Caller,
    limit: Option<u32>,
) -> ApiResult<DnsTaskPage> {
    caller.require_admin()?;
    let consumer = caller.consumer_key();
    let limit = page_limit(limit, state.limits.task_poll_limit);
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let cursor = task_cursors::get_cursor(&mut conn, &consumer, TaskStream::Dns).await?;
    let tasks = dns_tasks::list_dns_tasks_after(&mut conn, cursor, limit)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(DnsTaskPage { cursor, tasks })
}

pub async fn ack_dns_tasks(
    state: &AppState,
    caller: &Caller,
    last_task_id: i64,
) -> ApiResult<TaskAckResponse> {
    caller.require_admin()?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    if last_task_id < 0 || last_task_id > dns_tasks::max_dns_task_id(&mut tx).await? {
        return Err(invalid_argument(format!("unknown dns task id: {last_task_id}")).into());
    }
    let cursor = task_cursors::advance_cursor(
        &mut tx,
        &caller.consumer_key(),
        TaskStream::Dns,
        last_task_id,
    )
    .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(TaskAckResponse { cursor })
}
