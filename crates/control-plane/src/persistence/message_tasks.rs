use common::api::MessageTaskStatus;
use serde::Serialize;
use sqlx::FromRow;

use super::{Conn, STATE_ENABLED};
use crate::Result;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MessageTaskRecord {
    pub id: i64,
    pub message_id: i64,
    pub recipient_id: i64,
    pub recipient_group_id: i64,
    pub instance_id: i64,
    pub user: String,
    pub subject: String,
    pub body: String,
    #[sqlx(try_from = "String")]
    pub status: MessageTaskStatus,
    pub result_json: Option<String>,
    pub is_primary: bool,
    pub sent_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewMessageTask {
    pub message_id: i64,
    pub recipient_id: i64,
    pub recipient_group_id: i64,
    pub instance_id: i64,
    pub user: String,
    pub subject: String,
    pub body: String,
    pub is_primary: bool,
    pub created_at: i64,
}

pub async fn create_message_task(conn: &mut Conn, task: NewMessageTask) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO message_tasks (
            message_id,
            recipient_id,
            recipient_group_id,
            instance_id,
            user,
            subject,
            body,
            status,
            is_primary,
            state,
            created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(task.message_id)
    .bind(task.recipient_id)
    .bind(task.recipient_group_id)
    .bind(task.instance_id)
    .bind(&task.user)
    .bind(&task.subject)
    .bind(&task.body)
    .bind(MessageTaskStatus::Pending.as_str())
    .bind(task.is_primary)
    .bind(STATE_ENABLED)
    .bind(task.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Pending deliveries, primary tasks first.
pub async fn list_pending_message_tasks(
    conn: &mut Conn,
    limit: u32,
) -> Result<Vec<MessageTaskRecord>> {
    let records = sqlx::query_as::<_, MessageTaskRecord>(
        r#"
        SELECT
            id,
            message_id,
            recipient_id,
            recipient_group_id,
            instance_id,
            user,
            subject,
            body,
            status,
            result_json,
            is_primary,
            sent_at,
            created_at
        FROM message_tasks
        WHERE status = ?1 AND state = ?2
        ORDER BY is_primary DESC, id ASC
        LIMIT ?3
        "#,
    )
    .bind(MessageTaskStatus::Pending.as_str())
    .bind(STATE_ENABLED)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    Ok(records)
}

pub async fn update_message_task_status(
    conn: &mut Conn,
    id: i64,
    status: MessageTaskStatus,
    result_json: Option<&str>,
    sent_at: i64,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE message_tasks
        SET status = ?1, result_json = COALESCE(?2, result_json), sent_at = ?3
        WHERE id = ?4 AND state = ?5
        "#,
    )
    .bind(status.as_str())
    .bind(result_json)
    .bind(sent_at)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn count_tasks_with_message(conn: &mut Conn, message_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM message_tasks WHERE message_id = ?1")
        .bind(message_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Drop delivery tasks created before `before` (unix secs).
pub async fn delete_message_tasks_before(conn: &mut Conn, before: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM message_tasks WHERE created_at < ?1")
        .bind(before)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
