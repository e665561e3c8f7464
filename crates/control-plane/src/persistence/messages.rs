use common::api::{MessageLevel, MessageType};
use sqlx::{FromRow, QueryBuilder, Sqlite};

use super::{Conn, STATE_ENABLED};
use crate::Result;

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub admin_id: i64,
    pub user_id: i64,
    pub cluster_id: i64,
    pub node_id: i64,
    pub server_id: i64,
    #[sqlx(rename = "type", try_from = "String")]
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[sqlx(try_from = "String")]
    pub level: MessageLevel,
    pub subject: String,
    pub body: String,
    pub params_json: Option<String>,
    pub hash: String,
    pub day: String,
    pub is_read: bool,
    /// Unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub admin_id: i64,
    pub user_id: i64,
    pub cluster_id: i64,
    pub node_id: i64,
    pub server_id: i64,
    pub kind: MessageType,
    pub level: MessageLevel,
    pub subject: String,
    pub body: String,
    pub params_json: Option<String>,
    pub hash: String,
    pub day: String,
    pub created_at: i64,
}

/// Listing scope. `user_id == 0` selects the administrator inbox.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub user_id: i64,
    pub kind: Option<MessageType>,
    pub unread_only: bool,
}

const MESSAGE_COLUMNS: &str = r#"
    id,
    admin_id,
    user_id,
    cluster_id,
    node_id,
    server_id,
    type,
    level,
    subject,
    body,
    params_json,
    hash,
    day,
    is_read,
    created_at
"#;

pub async fn create_message(conn: &mut Conn, message: NewMessage) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO messages (
            admin_id,
            user_id,
            cluster_id,
            node_id,
            server_id,
            type,
            level,
            subject,
            body,
            params_json,
            hash,
            day,
            is_read,
            state,
            created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, ?14)
        "#,
    )
    .bind(message.admin_id)
    .bind(message.user_id)
    .bind(message.cluster_id)
    .bind(message.node_id)
    .bind(message.server_id)
    .bind(message.kind.as_str())
    .bind(message.level.as_str())
    .bind(&message.subject)
    .bind(&message.body)
    .bind(message.params_json.as_deref())
    .bind(&message.hash)
    .bind(&message.day)
    .bind(STATE_ENABLED)
    .bind(message.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Whether a message with `hash` was stored at or after `since` (unix secs).
pub async fn exists_hash_since(conn: &mut Conn, hash: &str, since: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM messages WHERE hash = ?1 AND created_at >= ?2 LIMIT 1",
    )
    .bind(hash)
    .bind(since)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found.is_some())
}

pub async fn get_enabled_message(conn: &mut Conn, id: i64) -> Result<Option<MessageRecord>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND state = ?2");
    let record = sqlx::query_as::<_, MessageRecord>(&sql)
        .bind(id)
        .bind(STATE_ENABLED)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(record)
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &MessageFilter) {
    qb.push(" WHERE state = ").push_bind(STATE_ENABLED);
    qb.push(" AND user_id = ").push_bind(filter.user_id);
    if let Some(kind) = filter.kind {
        qb.push(" AND type = ").push_bind(kind.as_str());
    }
    if filter.unread_only {
        qb.push(" AND is_read = 0");
    }
}

pub async fn count_messages(conn: &mut Conn, filter: &MessageFilter) -> Result<i64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM messages");
    push_filter(&mut qb, filter);
    let count = qb
        .build_query_scalar::<i64>()
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub async fn list_messages(
    conn: &mut Conn,
    filter: &MessageFilter,
    limit: u32,
    offset: u32,
) -> Result<Vec<MessageRecord>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {MESSAGE_COLUMNS} FROM messages"));
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY id DESC");
    qb.push(" LIMIT ").push_bind(limit as i64);
    qb.push(" OFFSET ").push_bind(offset as i64);
    let rows = qb
        .build_query_as::<MessageRecord>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

pub async fn mark_message_read(conn: &mut Conn, id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE messages SET is_read = 1 WHERE id = ?1 AND state = ?2")
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn mark_all_read(conn: &mut Conn, user_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE messages SET is_read = 1 WHERE user_id = ?1 AND state = ?2 AND is_read = 0",
    )
    .bind(user_id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Remove every message whose day bucket sorts before `day` (`YYYYMMDD`).
pub async fn delete_messages_before_day(conn: &mut Conn, day: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM messages WHERE day < ?1")
        .bind(day)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;

    fn message(user_id: i64, hash: &str, day: &str, created_at: i64) -> NewMessage {
        NewMessage {
            admin_id: 0,
            user_id,
            cluster_id: 1,
            node_id: 0,
            server_id: 0,
            kind: MessageType::NodeInactive,
            level: MessageLevel::Warning,
            subject: "node inactive".into(),
            body: "node 3 stopped reporting".into(),
            params_json: None,
            hash: hash.into(),
            day: day.into(),
            created_at,
        }
    }

    #[tokio::test]
    async fn hash_window_lookup_uses_created_at() {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        let mut conn = db.acquire().await.expect("conn");

        create_message(&mut conn, message(0, "h1", "20260101", 1_000))
            .await
            .expect("create");
        assert!(exists_hash_since(&mut conn, "h1", 900).await.expect("exists"));
        assert!(exists_hash_since(&mut conn, "h1", 1_000).await.expect("exists"));
        assert!(!exists_hash_since(&mut conn, "h1", 1_001).await.expect("exists"));
        assert!(!exists_hash_since(&mut conn, "h2", 0).await.expect("exists"));
    }

    #[tokio::test]
    async fn inbox_filters_and_retention() {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        let mut conn = db.acquire().await.expect("conn");

        let old = create_message(&mut conn, message(0, "a", "20260101", 1))
            .await
            .expect("create");
        create_message(&mut conn, message(0, "b", "20260301", 2))
            .await
            .expect("create");
        create_message(&mut conn, message(5, "c", "20260301", 3))
            .await
            .expect("create");

        let admin_unread = MessageFilter {
            unread_only: true,
            ..MessageFilter::default()
        };
        assert_eq!(count_messages(&mut conn, &admin_unread).await.expect("count"), 2);
        mark_message_read(&mut conn, old).await.expect("read");
        assert_eq!(count_messages(&mut conn, &admin_unread).await.expect("count"), 1);

        let user = MessageFilter {
            user_id: 5,
            kind: Some(MessageType::NodeInactive),
            unread_only: false,
        };
        let listed = list_messages(&mut conn, &user, 10, 0).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].level, MessageLevel::Warning);
        assert_eq!(mark_all_read(&mut conn, 5).await.expect("all read"), 1);

        assert_eq!(
            delete_messages_before_day(&mut conn, "20260201")
                .await
                .expect("delete"),
            1
        );
        assert!(get_enabled_message(&mut conn, old)
            .await
            .expect("get")
            .is_none());
    }
}
