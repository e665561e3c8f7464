use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::config::{ClusterDnsConfig, HealthCheckConfig, ToaConfig};
use sqlx::types::Json;
use sqlx::FromRow;

use super::{Conn, STATE_DISABLED, STATE_ENABLED};
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct ClusterRecord {
    pub id: i64,
    pub admin_id: i64,
    pub name: String,
    pub unique_id: String,
    pub secret_hash: String,
    pub dns_domain_id: i64,
    pub dns_name: String,
    #[sqlx(rename = "dns_json")]
    pub dns: Option<Json<ClusterDnsConfig>>,
    #[sqlx(rename = "health_check_json")]
    pub health_check: Option<Json<HealthCheckConfig>>,
    #[sqlx(rename = "toa_json")]
    pub toa: Option<Json<ToaConfig>>,
    pub cache_policy_id: i64,
    pub http_firewall_policy_id: i64,
    #[sqlx(rename = "system_services_json")]
    pub system_services: Option<Json<BTreeMap<String, serde_json::Value>>>,
    pub state: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCluster {
    pub admin_id: i64,
    pub name: String,
    pub unique_id: String,
    pub secret_hash: String,
    pub dns: ClusterDnsConfig,
}

/// DNS binding of a cluster.
#[derive(Debug, Clone, FromRow)]
pub struct ClusterDnsInfo {
    pub id: i64,
    pub name: String,
    pub dns_domain_id: i64,
    pub dns_name: String,
    #[sqlx(rename = "dns_json")]
    pub dns: Option<Json<ClusterDnsConfig>>,
}

impl ClusterDnsInfo {
    /// A binding is usable only with both a domain and a subdomain name.
    pub fn is_bound(&self) -> bool {
        self.dns_domain_id > 0 && !self.dns_name.is_empty()
    }
}

const CLUSTER_COLUMNS: &str = r#"
    id,
    admin_id,
    name,
    unique_id,
    secret_hash,
    dns_domain_id,
    dns_name,
    dns_json,
    health_check_json,
    toa_json,
    cache_policy_id,
    http_firewall_policy_id,
    system_services_json,
    state,
    created_at
"#;

pub async fn create_cluster(conn: &mut Conn, new_cluster: NewCluster) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO node_clusters (admin_id, name, unique_id, secret_hash, dns_json, state)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(new_cluster.admin_id)
    .bind(&new_cluster.name)
    .bind(&new_cluster.unique_id)
    .bind(&new_cluster.secret_hash)
    .bind(Json(new_cluster.dns))
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_enabled_cluster(conn: &mut Conn, id: i64) -> Result<Option<ClusterRecord>> {
    let sql = format!("SELECT {CLUSTER_COLUMNS} FROM node_clusters WHERE id = ?1 AND state = ?2");
    let record = sqlx::query_as::<_, ClusterRecord>(&sql)
        .bind(id)
        .bind(STATE_ENABLED)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(record)
}

pub async fn find_enabled_cluster_by_unique_id(
    conn: &mut Conn,
    unique_id: &str,
) -> Result<Option<ClusterRecord>> {
    let sql = format!(
        "SELECT {CLUSTER_COLUMNS} FROM node_clusters WHERE unique_id = ?1 AND state = ?2"
    );
    let record = sqlx::query_as::<_, ClusterRecord>(&sql)
        .bind(unique_id)
        .bind(STATE_ENABLED)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(record)
}

pub async fn exists_unique_id(conn: &mut Conn, unique_id: &str) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM node_clusters WHERE unique_id = ?1 LIMIT 1")
            .bind(unique_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

pub async fn exists_enabled_cluster(conn: &mut Conn, id: i64) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM node_clusters WHERE id = ?1 AND state = ?2")
            .bind(id)
            .bind(STATE_ENABLED)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

pub async fn list_enabled_cluster_ids(conn: &mut Conn) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT id FROM node_clusters WHERE state = ?1 ORDER BY id")
        .bind(STATE_ENABLED)
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids)
}

pub async fn update_cluster_name(conn: &mut Conn, id: i64, name: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE node_clusters SET name = ?1 WHERE id = ?2 AND state = ?3")
        .bind(name)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn disable_cluster(conn: &mut Conn, id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE node_clusters SET state = ?1 WHERE id = ?2 AND state = ?3")
        .bind(STATE_DISABLED)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn update_health_check(
    conn: &mut Conn,
    id: i64,
    health_check: &HealthCheckConfig,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE node_clusters SET health_check_json = ?1 WHERE id = ?2 AND state = ?3",
    )
    .bind(Json(health_check))
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_toa(conn: &mut Conn, id: i64, toa: &ToaConfig) -> Result<u64> {
    let result =
        sqlx::query("UPDATE node_clusters SET toa_json = ?1 WHERE id = ?2 AND state = ?3")
            .bind(Json(toa))
            .bind(id)
            .bind(STATE_ENABLED)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected())
}

pub async fn update_cache_policy(conn: &mut Conn, id: i64, cache_policy_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE node_clusters SET cache_policy_id = ?1 WHERE id = ?2 AND state = ?3",
    )
    .bind(cache_policy_id)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_firewall_policy(
    conn: &mut Conn,
    id: i64,
    http_firewall_policy_id: i64,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE node_clusters SET http_firewall_policy_id = ?1 WHERE id = ?2 AND state = ?3",
    )
    .bind(http_firewall_policy_id)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Set one entry of the per-service parameter map. Runs read-modify-write on
/// the caller's connection, so pass a transaction.
pub async fn update_system_service(
    conn: &mut Conn,
    id: i64,
    service_type: &str,
    params: serde_json::Value,
) -> Result<u64> {
    let Some(cluster) = get_enabled_cluster(conn, id).await? else {
        return Ok(0);
    };
    let mut services = cluster.system_services.map(|s| s.0).unwrap_or_default();
    services.insert(service_type.to_string(), params);

    let result = sqlx::query(
        "UPDATE node_clusters SET system_services_json = ?1 WHERE id = ?2 AND state = ?3",
    )
    .bind(Json(services))
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_dns(
    conn: &mut Conn,
    id: i64,
    dns_domain_id: i64,
    dns_name: &str,
    dns: &ClusterDnsConfig,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE node_clusters
        SET dns_domain_id = ?1, dns_name = ?2, dns_json = ?3
        WHERE id = ?4 AND state = ?5
        "#,
    )
    .bind(dns_domain_id)
    .bind(dns_name)
    .bind(Json(dns))
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn find_cluster_dns(conn: &mut Conn, id: i64) -> Result<Option<ClusterDnsInfo>> {
    let info = sqlx::query_as::<_, ClusterDnsInfo>(
        r#"
        SELECT id, name, dns_domain_id, dns_name, dns_json
        FROM node_clusters
        WHERE id = ?1 AND state = ?2
        "#,
    )
    .bind(id)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{migrations, Db};
    use serde_json::json;

    async fn setup_db() -> Db {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        db
    }

    fn new_cluster(unique_id: &str) -> NewCluster {
        NewCluster {
            admin_id: 1,
            name: "edge-eu".into(),
            unique_id: unique_id.into(),
            secret_hash: "hash".into(),
            dns: ClusterDnsConfig::default(),
        }
    }

    #[tokio::test]
    async fn create_and_lookup_cluster() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let id = create_cluster(&mut conn, new_cluster("u-1"))
            .await
            .expect("create");

        let cluster = get_enabled_cluster(&mut conn, id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(cluster.name, "edge-eu");
        assert_eq!(cluster.dns.map(|d| d.0), Some(ClusterDnsConfig::default()));
        assert!(exists_unique_id(&mut conn, "u-1").await.expect("exists"));
        assert!(!exists_unique_id(&mut conn, "u-2").await.expect("exists"));

        let by_unique = find_enabled_cluster_by_unique_id(&mut conn, "u-1")
            .await
            .expect("find");
        assert_eq!(by_unique.map(|c| c.id), Some(id));
    }

    #[tokio::test]
    async fn disabled_cluster_is_hidden() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let id = create_cluster(&mut conn, new_cluster("u-1"))
            .await
            .expect("create");
        assert_eq!(disable_cluster(&mut conn, id).await.expect("disable"), 1);
        assert_eq!(disable_cluster(&mut conn, id).await.expect("disable"), 0);
        assert!(get_enabled_cluster(&mut conn, id)
            .await
            .expect("get")
            .is_none());
        assert!(list_enabled_cluster_ids(&mut conn)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn dns_binding_requires_domain_and_name() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let id = create_cluster(&mut conn, new_cluster("u-1"))
            .await
            .expect("create");

        let info = find_cluster_dns(&mut conn, id)
            .await
            .expect("dns")
            .expect("present");
        assert!(!info.is_bound());

        update_dns(&mut conn, id, 4, "cdn", &ClusterDnsConfig::default())
            .await
            .expect("update dns");
        let info = find_cluster_dns(&mut conn, id)
            .await
            .expect("dns")
            .expect("present");
        assert!(info.is_bound());
        assert_eq!(info.dns_name, "cdn");
    }

    #[tokio::test]
    async fn system_services_merge_per_type() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let id = create_cluster(&mut conn, new_cluster("u-1"))
            .await
            .expect("create");

        update_system_service(&mut conn, id, "systemd", json!({"isOn": true}))
            .await
            .expect("systemd");
        update_system_service(&mut conn, id, "ntp", json!({"server": "pool.ntp.org"}))
            .await
            .expect("ntp");

        let cluster = get_enabled_cluster(&mut conn, id)
            .await
            .expect("get")
            .expect("present");
        let services = cluster.system_services.expect("services").0;
        assert_eq!(services.len(), 2);
        assert_eq!(services["systemd"], json!({"isOn": true}));
    }
}
