use chrono::{DateTime, Utc};
use common::api::{DnsTask, DnsTaskType, TaskScope};
use sqlx::FromRow;

use super::Conn;
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct DnsTaskRecord {
    pub id: i64,
    pub cluster_id: i64,
    pub domain_id: i64,
    #[sqlx(rename = "scope_type", try_from = "String")]
    pub scope: TaskScope,
    pub scope_id: i64,
    #[sqlx(try_from = "String")]
    pub task_type: DnsTaskType,
    pub created_at: DateTime<Utc>,
}

impl From<DnsTaskRecord> for DnsTask {
    fn from(record: DnsTaskRecord) -> Self {
        DnsTask {
            id: record.id,
            scope: record.scope,
            scope_id: record.scope_id,
            cluster_id: record.cluster_id,
            domain_id: record.domain_id,
            task_type: record.task_type,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NewDnsTask {
    pub cluster_id: i64,
    pub domain_id: i64,
    pub scope: TaskScope,
    pub scope_id: i64,
    pub task_type: DnsTaskType,
}

pub async fn create_dns_task(conn: &mut Conn, task: NewDnsTask) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO dns_tasks (cluster_id, domain_id, scope_type, scope_id, task_type)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(task.cluster_id)
    .bind(task.domain_id)
    .bind(task.scope.as_str())
    .bind(task.scope_id)
    .bind(task.task_type.as_str())
    .execute(&mut *conn)
    .await?;
    crate::metrics::record_dns_task(task.task_type);
    Ok(result.last_insert_rowid())
}

pub async fn list_dns_tasks_after(
    conn: &mut Conn,
    after_id: i64,
    limit: u32,
) -> Result<Vec<DnsTaskRecord>> {
    let records = sqlx::query_as::<_, DnsTaskRecord>(
        r#"
        SELECT id, cluster_id, domain_id, scope_type, scope_id, task_type, created_at
        FROM dns_tasks
        WHERE id > ?1
        ORDER BY id ASC
        LIMIT ?2
        "#,
    )
    .bind(after_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    Ok(records)
}

pub async fn max_dns_task_id(conn: &mut Conn) -> Result<i64> {
    let id: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM dns_tasks")
        .fetch_one(&mut *conn)
        .await?;
    Ok(id.unwrap_or_default())
}

pub async fn count_dns_tasks(conn: &mut Conn) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM dns_tasks")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;

    #[tokio::test]
    async fn dns_tasks_are_listed_in_id_order() {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        let mut conn = db.acquire().await.expect("conn");

        for (scope, task_type) in [
            (TaskScope::Server, DnsTaskType::ServerChange),
            (TaskScope::Cluster, DnsTaskType::ClusterChange),
        ] {
            create_dns_task(
                &mut conn,
                NewDnsTask {
                    cluster_id: 1,
                    domain_id: 4,
                    scope,
                    scope_id: 9,
                    task_type,
                },
            )
            .await
            .expect("create");
        }

        let tasks = list_dns_tasks_after(&mut conn, 0, 10).await.expect("list");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_type, DnsTaskType::ServerChange);
        let wire: DnsTask = tasks[1].clone().into();
        assert_eq!(wire.scope, TaskScope::Cluster);
        assert_eq!(wire.domain_id, 4);

        assert_eq!(
            list_dns_tasks_after(&mut conn, tasks[0].id, 10)
                .await
                .expect("list")
                .len(),
            1
        );
        assert_eq!(max_dns_task_id(&mut conn).await.expect("max"), tasks[1].id);
    }
}
