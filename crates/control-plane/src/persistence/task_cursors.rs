use super::Conn;
use crate::Result;

/// Task stream a cursor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStream {
    Node,
    Dns,
}

impl TaskStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStream::Node => "node",
            TaskStream::Dns => "dns",
        }
    }
}

/// Last acknowledged task id; zero for a consumer that never acked.
pub async fn get_cursor(conn: &mut Conn, consumer: &str, stream: TaskStream) -> Result<i64> {
    let cursor: Option<i64> = sqlx::query_scalar(
        "SELECT last_task_id FROM task_cursors WHERE consumer = ?1 AND stream = ?2",
    )
    .bind(consumer)
    .bind(stream.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(cursor.unwrap_or_default())
}

/// Move the cursor forward to `last_task_id`. Never moves backwards; returns
/// the stored value.
pub async fn advance_cursor(
    conn: &mut Conn,
    consumer: &str,
    stream: TaskStream,
    last_task_id: i64,
) -> Result<i64> {
    let cursor = sqlx::query_scalar(
        r#"
        INSERT INTO task_cursors (consumer, stream, last_task_id, updated_at)
        VALUES (?1, ?2, ?3, datetime('now'))
        ON CONFLICT(consumer, stream) DO UPDATE SET
            last_task_id = MAX(task_cursors.last_task_id, excluded.last_task_id),
            updated_at = excluded.updated_at
        RETURNING last_task_id
        "#,
    )
    .bind(consumer)
    .bind(stream.as_str())
    .bind(last_task_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(cursor)
}
