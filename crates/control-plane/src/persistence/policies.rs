//! Sub-entities referenced from servers: SSL policies, web configs and
//! reverse proxies. JSON bodies are stored as raw text and decoded by the
//! composer.

use sqlx::FromRow;

use super::{Conn, STATE_DISABLED, STATE_ENABLED};
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct SslPolicyRecord {
    pub id: i64,
    pub admin_id: i64,
    pub user_id: i64,
    pub is_on: bool,
    pub certs_json: Option<String>,
    pub min_version: String,
    pub cipher_suites_json: Option<String>,
    pub hsts_json: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewSslPolicy {
    pub admin_id: i64,
    pub user_id: i64,
    pub certs_json: Option<String>,
    pub min_version: String,
    pub cipher_suites_json: Option<String>,
    pub hsts_json: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WebRecord {
    pub id: i64,
    pub admin_id: i64,
    pub user_id: i64,
    pub is_on: bool,
    pub config_json: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReverseProxyRecord {
    pub id: i64,
    pub admin_id: i64,
    pub user_id: i64,
    pub is_on: bool,
    pub scheduling_json: Option<String>,
    pub primary_origins_json: Option<String>,
    pub backup_origins_json: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewReverseProxy {
    pub admin_id: i64,
    pub user_id: i64,
    pub scheduling_json: Option<String>,
    pub primary_origins_json: Option<String>,
    pub backup_origins_json: Option<String>,
}

pub async fn create_ssl_policy(conn: &mut Conn, policy: NewSslPolicy) -> Result<i64> {
    let min_version = if policy.min_version.is_empty() {
        "TLS 1.1"
    } else {
        policy.min_version.as_str()
    };
    let result = sqlx::query(
        r#"
        INSERT INTO ssl_policies (
            admin_id, user_id, is_on, certs_json, min_version, cipher_suites_json, hsts_json, state
        )
        VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(policy.admin_id)
    .bind(policy.user_id)
    .bind(policy.certs_json.as_deref())
    .bind(min_version)
    .bind(policy.cipher_suites_json.as_deref())
    .bind(policy.hsts_json.as_deref())
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_enabled_ssl_policy(conn: &mut Conn, id: i64) -> Result<Option<SslPolicyRecord>> {
    let record = sqlx::query_as::<_, SslPolicyRecord>(
        r#"
        SELECT id, admin_id, user_id, is_on, certs_json, min_version, cipher_suites_json, hsts_json
        FROM ssl_policies
        WHERE id = ?1 AND state = ?2
        "#,
    )
    .bind(id)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

pub async fn disable_ssl_policy(conn: &mut Conn, id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE ssl_policies SET state = ?1 WHERE id = ?2")
        .bind(STATE_DISABLED)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Whether an enabled SSL policy belongs to the user.
pub async fn check_user_ssl_policy(conn: &mut Conn, user_id: i64, policy_id: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM ssl_policies WHERE id = ?1 AND user_id = ?2 AND state = ?3",
    )
    .bind(policy_id)
    .bind(user_id)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found.is_some())
}

pub async fn create_web(
    conn: &mut Conn,
    admin_id: i64,
    user_id: i64,
    config_json: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO http_webs (admin_id, user_id, is_on, config_json, state)
        VALUES (?1, ?2, 1, ?3, ?4)
        "#,
    )
    .bind(admin_id)
    .bind(user_id)
    .bind(config_json)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_enabled_web(conn: &mut Conn, id: i64) -> Result<Option<WebRecord>> {
    let record = sqlx::query_as::<_, WebRecord>(
        "SELECT id, admin_id, user_id, is_on, config_json FROM http_webs WHERE id = ?1 AND state = ?2",
    )
    .bind(id)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

pub async fn update_web_config(conn: &mut Conn, id: i64, config_json: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE http_webs SET config_json = ?1 WHERE id = ?2 AND state = ?3")
        .bind(config_json)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn create_reverse_proxy(conn: &mut Conn, proxy: NewReverseProxy) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO reverse_proxies (
            admin_id, user_id, is_on, scheduling_json, primary_origins_json, backup_origins_json, state
        )
        VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(proxy.admin_id)
    .bind(proxy.user_id)
    .bind(proxy.scheduling_json.as_deref())
    .bind(proxy.primary_origins_json.as_deref())
    .bind(proxy.backup_origins_json.as_deref())
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_enabled_reverse_proxy(
    conn: &mut Conn,
    id: i64,
) -> Result<Option<ReverseProxyRecord>> {
    let record = sqlx::query_as::<_, ReverseProxyRecord>(
        r#"
        SELECT id, admin_id, user_id, is_on, scheduling_json, primary_origins_json, backup_origins_json
        FROM reverse_proxies
        WHERE id = ?1 AND state = ?2
        "#,
    )
    .bind(id)
    .bind(STATE_ENABLED)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}
