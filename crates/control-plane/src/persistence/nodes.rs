use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{Conn, STATE_DISABLED, STATE_ENABLED};
use crate::Result;

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct NodeRecord {
    pub id: i64,
    pub cluster_id: i64,
    pub name: String,
    pub is_on: bool,
    pub state: i64,
    pub created_at: DateTime<Utc>,
}

pub async fn create_node(conn: &mut Conn, cluster_id: i64, name: &str) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO nodes (cluster_id, name, is_on, state) VALUES (?1, ?2, 1, ?3)",
    )
    .bind(cluster_id)
    .bind(name)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_enabled_node(conn: &mut Conn, id: i64) -> Result<Option<NodeRecord>> {
    let record = sqlx::query_as::<_, NodeRecord>(
        r#"
        SELECT id, cluster_id, name, is_on, state, created_at
        FROM nodes
        WHERE id = ?1 AND state = ?2
        "#,
    )
    .bind(id)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

/// Cluster of a node regardless of its state; zero when unknown.
pub async fn find_node_cluster_id(conn: &mut Conn, id: i64) -> Result<i64> {
    let cluster_id: Option<i64> = sqlx::query_scalar("SELECT cluster_id FROM nodes WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(cluster_id.unwrap_or_default())
}

pub async fn update_node(conn: &mut Conn, id: i64, name: &str, cluster_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE nodes SET name = ?1, cluster_id = ?2 WHERE id = ?3 AND state = ?4",
    )
    .bind(name)
    .bind(cluster_id)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn disable_node(conn: &mut Conn, id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE nodes SET state = ?1 WHERE id = ?2 AND state = ?3")
        .bind(STATE_DISABLED)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn list_enabled_nodes_with_cluster(
    conn: &mut Conn,
    cluster_id: i64,
) -> Result<Vec<NodeRecord>> {
    let records = sqlx::query_as::<_, NodeRecord>(
        r#"
        SELECT id, cluster_id, name, is_on, state, created_at
        FROM nodes
        WHERE cluster_id = ?1 AND state = ?2
        ORDER BY id
        "#,
    )
    .bind(cluster_id)
    .bind(STATE_ENABLED)
    .fetch_all(&mut *conn)
    .await?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;

    #[tokio::test]
    async fn node_lifecycle() {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        let mut conn = db.acquire().await.expect("conn");

        let id = create_node(&mut conn, 3, "edge-1").await.expect("create");
        assert_eq!(find_node_cluster_id(&mut conn, id).await.expect("cluster"), 3);

        update_node(&mut conn, id, "edge-1b", 5)
            .await
            .expect("update");
        let node = get_enabled_node(&mut conn, id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(node.name, "edge-1b");
        assert_eq!(node.cluster_id, 5);
        assert_eq!(
            list_enabled_nodes_with_cluster(&mut conn, 5)
                .await
                .expect("list")
                .len(),
            1
        );

        disable_node(&mut conn, id).await.expect("disable");
        assert!(get_enabled_node(&mut conn, id).await.expect("get").is_none());
        // Cluster lookup ignores state so disabling can still notify the cluster.
        assert_eq!(find_node_cluster_id(&mut conn, id).await.expect("cluster"), 5);
        assert_eq!(find_node_cluster_id(&mut conn, 999).await.expect("cluster"), 0);
    }
}
