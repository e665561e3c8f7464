use chrono::{DateTime, Utc};
use common::api::{NodeTask, NodeTaskType, TaskScope};
use sqlx::FromRow;

use super::Conn;
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct NodeTaskRecord {
    pub id: i64,
    pub cluster_id: i64,
    #[sqlx(rename = "scope_type", try_from = "String")]
    pub scope: TaskScope,
    pub scope_id: i64,
    #[sqlx(try_from = "String")]
    pub task_type: NodeTaskType,
    pub created_at: DateTime<Utc>,
}

impl From<NodeTaskRecord> for NodeTask {
    fn from(record: NodeTaskRecord) -> Self {
        NodeTask {
            id: record.id,
            scope: record.scope,
            scope_id: record.scope_id,
            task_type: record.task_type,
            created_at: record.created_at,
        }
    }
}

async fn insert_task(
    conn: &mut Conn,
    cluster_id: i64,
    scope: TaskScope,
    scope_id: i64,
    task_type: NodeTaskType,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO node_tasks (cluster_id, scope_type, scope_id, task_type)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(cluster_id)
    .bind(scope.as_str())
    .bind(scope_id)
    .bind(task_type.as_str())
    .execute(&mut *conn)
    .await?;
    crate::metrics::record_node_task(task_type);
    Ok(result.last_insert_rowid())
}

/// Task for every node of a cluster.
pub async fn create_cluster_task(
    conn: &mut Conn,
    cluster_id: i64,
    task_type: NodeTaskType,
) -> Result<i64> {
    insert_task(conn, cluster_id, TaskScope::Cluster, 0, task_type).await
}

pub async fn create_node_task(
    conn: &mut Conn,
    cluster_id: i64,
    node_id: i64,
    task_type: NodeTaskType,
) -> Result<i64> {
    insert_task(conn, cluster_id, TaskScope::Node, node_id, task_type).await
}

pub async fn create_server_task(
    conn: &mut Conn,
    cluster_id: i64,
    server_id: i64,
    task_type: NodeTaskType,
) -> Result<i64> {
    insert_task(conn, cluster_id, TaskScope::Server, server_id, task_type).await
}

/// Tasks a node of `cluster_id` must see after `after_id`: cluster and server
/// scoped tasks of its cluster, plus node tasks addressed to it or to every
/// node. Oldest first.
pub async fn list_tasks_after(
    conn: &mut Conn,
    cluster_id: i64,
    node_id: i64,
    after_id: i64,
    limit: u32,
) -> Result<Vec<NodeTaskRecord>> {
    let records = sqlx::query_as::<_, NodeTaskRecord>(
        r#"
        SELECT id, cluster_id, scope_type, scope_id, task_type, created_at
        FROM node_tasks
        WHERE cluster_id = ?1
          AND id > ?2
          AND (scope_type != 'node' OR scope_id = 0 OR scope_id = ?3)
        ORDER BY id ASC
        LIMIT ?4
        "#,
    )
    .bind(cluster_id)
    .bind(after_id)
    .bind(node_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    Ok(records)
}

pub async fn max_task_id(conn: &mut Conn) -> Result<i64> {
    let id: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM node_tasks")
        .fetch_one(&mut *conn)
        .await?;
    Ok(id.unwrap_or_default())
}

pub async fn count_cluster_tasks(conn: &mut Conn, cluster_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM node_tasks WHERE cluster_id = ?1")
        .bind(cluster_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
