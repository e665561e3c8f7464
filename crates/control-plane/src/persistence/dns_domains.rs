use sqlx::FromRow;

use super::{Conn, STATE_DISABLED, STATE_ENABLED};
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct DnsDomainRecord {
    pub id: i64,
    pub name: String,
    pub is_on: bool,
}

pub async fn create_domain(conn: &mut Conn, name: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO dns_domains (name, is_on, state) VALUES (?1, 1, ?2)")
        .bind(name)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_enabled_domain(conn: &mut Conn, id: i64) -> Result<Option<DnsDomainRecord>> {
    let record = sqlx::query_as::<_, DnsDomainRecord>(
        "SELECT id, name, is_on FROM dns_domains WHERE id = ?1 AND state = ?2",
    )
    .bind(id)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

pub async fn disable_domain(conn: &mut Conn, id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE dns_domains SET state = ?1 WHERE id = ?2")
        .bind(STATE_DISABLED)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
