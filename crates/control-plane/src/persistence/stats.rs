use sqlx::{FromRow, QueryBuilder, Sqlite};

use super::Conn;
use crate::Result;

/// One aggregated counter row keyed by (kind, server, item, version, period).
#[derive(Debug, Clone, PartialEq, Eq, FromRow, serde::Serialize)]
pub struct HttpStatRow {
    pub kind: String,
    pub server_id: i64,
    pub item: String,
    pub version: String,
    pub period: String,
    pub count: i64,
}

/// Add counts onto stored rows, inserting missing ones.
pub async fn upsert_http_stats(conn: &mut Conn, rows: &[HttpStatRow]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new(
        "INSERT INTO server_http_stats (kind, server_id, item, version, period, count) ",
    );
    qb.push_values(rows, |mut b, row| {
        b.push_bind(&row.kind)
            .push_bind(row.server_id)
            .push_bind(&row.item)
            .push_bind(&row.version)
            .push_bind(&row.period)
            .push_bind(row.count);
    });
    qb.push(
        r#"
        ON CONFLICT(kind, server_id, item, version, period) DO UPDATE SET
            count = server_http_stats.count + excluded.count
        "#,
    );
    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

pub async fn list_server_stats(
    conn: &mut Conn,
    kind: &str,
    server_id: i64,
    period: &str,
) -> Result<Vec<HttpStatRow>> {
    let rows = sqlx::query_as::<_, HttpStatRow>(
        r#"
        SELECT kind, server_id, item, version, period, count
        FROM server_http_stats
        WHERE kind = ?1 AND server_id = ?2 AND period = ?3
        ORDER BY count DESC, item ASC
        "#,
    )
    .bind(kind)
    .bind(server_id)
    .bind(period)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;

    fn row(item: &str, count: i64) -> HttpStatRow {
        HttpStatRow {
            kind: "browser".into(),
            server_id: 1,
            item: item.into(),
            version: "120".into(),
            period: "20260301".into(),
            count,
        }
    }

    #[tokio::test]
    async fn upsert_accumulates_counts() {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        let mut conn = db.acquire().await.expect("conn");

        upsert_http_stats(&mut conn, &[row("Chrome", 3), row("Firefox", 1)])
            .await
            .expect("first");
        upsert_http_stats(&mut conn, &[row("Chrome", 2)])
            .await
            .expect("second");
        assert_eq!(upsert_http_stats(&mut conn, &[]).await.expect("empty"), 0);

        let rows = list_server_stats(&mut conn, "browser", 1, "20260301")
            .await
            .expect("list");
        assert_eq!(rows, vec![row("Chrome", 5), row("Firefox", 1)]);
    }
}
