use sqlx::FromRow;

use super::{Conn, STATE_ENABLED};
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub cluster_id: i64,
}

pub async fn create_user(conn: &mut Conn, username: &str, cluster_id: i64) -> Result<i64> {
    let result =
        sqlx::query("INSERT INTO users (username, cluster_id, state) VALUES (?1, ?2, ?3)")
            .bind(username)
            .bind(cluster_id)
            .bind(STATE_ENABLED)
            .execute(&mut *conn)
            .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_enabled_user(conn: &mut Conn, id: i64) -> Result<Option<UserRecord>> {
    let record = sqlx::query_as::<_, UserRecord>(
        "SELECT id, username, cluster_id FROM users WHERE id = ?1 AND state = ?2",
    )
    .bind(id)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

pub async fn update_user_cluster_id(conn: &mut Conn, id: i64, cluster_id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE users SET cluster_id = ?1 WHERE id = ?2 AND state = ?3")
        .bind(cluster_id)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
