use sqlx::FromRow;

use super::{Conn, STATE_DISABLED, STATE_ENABLED};
use crate::Result;

pub const DEFAULT_ROLE: &str = "node";

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct IpAddressRecord {
    pub id: i64,
    pub node_id: i64,
    pub role: String,
    pub name: String,
    pub ip: String,
    pub can_access: bool,
    pub order: i64,
}

#[derive(Debug, Clone)]
pub struct NewIpAddress {
    pub node_id: i64,
    pub role: String,
    pub name: String,
    pub ip: String,
    pub can_access: bool,
}

pub async fn create_address(conn: &mut Conn, new_address: NewIpAddress) -> Result<i64> {
    let role = if new_address.role.is_empty() {
        DEFAULT_ROLE
    } else {
        new_address.role.as_str()
    };
    let result = sqlx::query(
        r#"
        INSERT INTO node_ip_addresses (node_id, role, name, ip, can_access, state)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(new_address.node_id)
    .bind(role)
    .bind(&new_address.name)
    .bind(&new_address.ip)
    .bind(new_address.can_access)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_enabled_address(conn: &mut Conn, id: i64) -> Result<Option<IpAddressRecord>> {
    let record = sqlx::query_as::<_, IpAddressRecord>(
        r#"
        SELECT id, node_id, role, name, ip, can_access, "order"
        FROM node_ip_addresses
        WHERE id = ?1 AND state = ?2
        "#,
    )
    .bind(id)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

/// Owning node regardless of state; zero when unknown.
pub async fn find_address_node_id(conn: &mut Conn, id: i64) -> Result<i64> {
    let node_id: Option<i64> =
        sqlx::query_scalar("SELECT node_id FROM node_ip_addresses WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(node_id.unwrap_or_default())
}

pub async fn update_address(
    conn: &mut Conn,
    id: i64,
    name: &str,
    ip: &str,
    can_access: bool,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE node_ip_addresses
        SET name = ?1, ip = ?2, can_access = ?3
        WHERE id = ?4 AND state = ?5
        "#,
    )
    .bind(name)
    .bind(ip)
    .bind(can_access)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_address_ip(conn: &mut Conn, id: i64, ip: &str) -> Result<u64> {
    let result =
        sqlx::query("UPDATE node_ip_addresses SET ip = ?1 WHERE id = ?2 AND state = ?3")
            .bind(ip)
            .bind(id)
            .bind(STATE_ENABLED)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected())
}

/// Move an address to another node. The row is re-enabled as part of the move.
pub async fn update_address_node(conn: &mut Conn, id: i64, node_id: i64) -> Result<u64> {
    let result =
        sqlx::query("UPDATE node_ip_addresses SET node_id = ?1, state = ?2 WHERE id = ?3")
            .bind(node_id)
            .bind(STATE_ENABLED)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected())
}

pub async fn disable_address(conn: &mut Conn, id: i64) -> Result<u64> {
    let result =
        sqlx::query("UPDATE node_ip_addresses SET state = ?1 WHERE id = ?2 AND state = ?3")
            .bind(STATE_DISABLED)
            .bind(id)
            .bind(STATE_ENABLED)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected())
}

pub async fn disable_all_with_node(conn: &mut Conn, node_id: i64, role: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE node_ip_addresses SET state = ?1 WHERE node_id = ?2 AND role = ?3 AND state = ?4",
    )
    .bind(STATE_DISABLED)
    .bind(node_id)
    .bind(role)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Enabled addresses of a node, highest `order` first, then oldest first.
pub async fn list_enabled_with_node(
    conn: &mut Conn,
    node_id: i64,
    role: &str,
) -> Result<Vec<IpAddressRecord>> {
    let records = sqlx::query_as::<_, IpAddressRecord>(
        r#"
        SELECT id, node_id, role, name, ip, can_access, "order"
        FROM node_ip_addresses
        WHERE node_id = ?1 AND role = ?2 AND state = ?3
        ORDER BY "order" DESC, id ASC
        "#,
    )
    .bind(node_id)
    .bind(role)
    .bind(STATE_ENABLED)
    .fetch_all(&mut *conn)
    .await?;
    Ok(records)
}

pub async fn find_first_access_ip(
    conn: &mut Conn,
    node_id: i64,
    role: &str,
) -> Result<Option<String>> {
    let ip = sqlx::query_scalar(
        r#"
        SELECT ip
        FROM node_ip_addresses
        WHERE node_id = ?1 AND role = ?2 AND state = ?3 AND can_access = 1
        ORDER BY "order" DESC, id ASC
        LIMIT 1
        "#,
    )
    .bind(node_id)
    .bind(role)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;

    fn address(node_id: i64, ip: &str, can_access: bool) -> NewIpAddress {
        NewIpAddress {
            node_id,
            role: String::new(),
            name: String::new(),
            ip: ip.into(),
            can_access,
        }
    }

    #[tokio::test]
    async fn listing_orders_by_order_then_id() {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        let mut conn = db.acquire().await.expect("conn");

        let first = create_address(&mut conn, address(1, "10.0.0.1", false))
            .await
            .expect("create");
        let second = create_address(&mut conn, address(1, "10.0.0.2", true))
            .await
            .expect("create");
        let third = create_address(&mut conn, address(1, "10.0.0.3", true))
            .await
            .expect("create");
        sqlx::query(r#"UPDATE node_ip_addresses SET "order" = 5 WHERE id = ?1"#)
            .bind(third)
            .execute(&mut *conn)
            .await
            .expect("reorder");

        let listed = list_enabled_with_node(&mut conn, 1, DEFAULT_ROLE)
            .await
            .expect("list");
        let ids: Vec<i64> = listed.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![third, first, second]);
        assert!(listed.iter().all(|a| a.role == DEFAULT_ROLE));

        assert_eq!(
            find_first_access_ip(&mut conn, 1, DEFAULT_ROLE)
                .await
                .expect("first"),
            Some("10.0.0.3".to_string())
        );
    }

    #[tokio::test]
    async fn reassign_re_enables_address() {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        let mut conn = db.acquire().await.expect("conn");

        let id = create_address(&mut conn, address(1, "10.0.0.1", true))
            .await
            .expect("create");
        disable_all_with_node(&mut conn, 1, DEFAULT_ROLE)
            .await
            .expect("disable all");
        assert!(get_enabled_address(&mut conn, id)
            .await
            .expect("get")
            .is_none());

        update_address_node(&mut conn, id, 2).await.expect("move");
        let moved = get_enabled_address(&mut conn, id)
            .await
            .expect("get")
            .expect("enabled again");
        assert_eq!(moved.node_id, 2);
    }
}
