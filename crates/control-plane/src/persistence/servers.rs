use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite};

use super::{Conn, STATE_DISABLED, STATE_ENABLED};
use crate::Result;

/// Stored server row. Protocol, reference and name blobs are kept as raw
/// JSON text so the composer can report malformed data per field.
#[derive(Debug, Clone, FromRow)]
pub struct ServerRecord {
    pub id: i64,
    pub admin_id: i64,
    pub user_id: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub cluster_id: i64,
    pub group_ids_json: String,
    pub is_on: bool,
    pub http_json: Option<String>,
    pub https_json: Option<String>,
    pub tcp_json: Option<String>,
    pub tls_json: Option<String>,
    pub unix_json: Option<String>,
    pub udp_json: Option<String>,
    pub web_id: i64,
    pub reverse_proxy_json: Option<String>,
    pub server_names_json: String,
    pub is_auditing: bool,
    pub auditing_server_names_json: Option<String>,
    pub auditing_result_json: Option<String>,
    pub dns_name: String,
    pub config_json: Option<String>,
    pub config_hash: String,
    pub version: i64,
    pub state: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewServer {
    pub admin_id: i64,
    pub user_id: i64,
    pub kind: String,
    pub name: String,
    pub description: String,
    pub cluster_id: i64,
    pub group_ids: Vec<i64>,
    pub http_json: Option<String>,
    pub https_json: Option<String>,
    pub tcp_json: Option<String>,
    pub tls_json: Option<String>,
    pub unix_json: Option<String>,
    pub udp_json: Option<String>,
    pub web_id: i64,
    pub reverse_proxy_json: Option<String>,
    pub server_names_json: String,
    pub is_auditing: bool,
    pub auditing_server_names_json: Option<String>,
    pub dns_name: String,
}

/// Protocol blob columns that can be replaced independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolColumn {
    Http,
    Https,
    Tcp,
    Tls,
    Unix,
    Udp,
}

impl ProtocolColumn {
    fn column(&self) -> &'static str {
        match self {
            ProtocolColumn::Http => "http_json",
            ProtocolColumn::Https => "https_json",
            ProtocolColumn::Tcp => "tcp_json",
            ProtocolColumn::Tls => "tls_json",
            ProtocolColumn::Unix => "unix_json",
            ProtocolColumn::Udp => "udp_json",
        }
    }
}

/// Protocol family filter for server listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    Http,
    Tcp,
    Udp,
    Unix,
}

impl std::str::FromStr for ProtocolFamily {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "http" => Ok(ProtocolFamily::Http),
            "tcp" => Ok(ProtocolFamily::Tcp),
            "udp" => Ok(ProtocolFamily::Udp),
            "unix" => Ok(ProtocolFamily::Unix),
            other => Err(crate::error::invalid_argument(format!(
                "unknown protocol family: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerMatchFilter {
    pub keyword: Option<String>,
    pub group_id: Option<i64>,
    pub user_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub is_auditing: Option<bool>,
    pub protocol_family: Option<ProtocolFamily>,
}

/// Compact listing row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ServerListRow {
    pub id: i64,
    pub user_id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub cluster_id: i64,
    pub is_on: bool,
    pub is_auditing: bool,
    pub dns_name: String,
    pub version: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ServerDnsRecord {
    pub id: i64,
    pub cluster_id: i64,
    pub dns_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ServerConfigRow {
    pub id: i64,
    pub version: i64,
    pub config_json: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ServerConfigState {
    pub config_hash: String,
    pub version: i64,
}

const SERVER_COLUMNS: &str = r#"
    id,
    admin_id,
    user_id,
    type,
    name,
    description,
    cluster_id,
    group_ids_json,
    is_on,
    http_json,
    https_json,
    tcp_json,
    tls_json,
    unix_json,
    udp_json,
    web_id,
    reverse_proxy_json,
    server_names_json,
    is_auditing,
    auditing_server_names_json,
    auditing_result_json,
    dns_name,
    config_json,
    config_hash,
    version,
    state,
    created_at
"#;

pub async fn create_server(conn: &mut Conn, new_server: NewServer) -> Result<i64> {
    let group_ids_json = serde_json::to_string(&new_server.group_ids)?;
    let result = sqlx::query(
        r#"
        INSERT INTO servers (
            admin_id,
            user_id,
            type,
            name,
            description,
            cluster_id,
            group_ids_json,
            is_on,
            http_json,
            https_json,
            tcp_json,
            tls_json,
            unix_json,
            udp_json,
            web_id,
            reverse_proxy_json,
            server_names_json,
            is_auditing,
            auditing_server_names_json,
            dns_name,
            version,
            state
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, 1, ?20)
        "#,
    )
    .bind(new_server.admin_id)
    .bind(new_server.user_id)
    .bind(&new_server.kind)
    .bind(&new_server.name)
    .bind(&new_server.description)
    .bind(new_server.cluster_id)
    .bind(group_ids_json)
    .bind(new_server.http_json.as_deref())
    .bind(new_server.https_json.as_deref())
    .bind(new_server.tcp_json.as_deref())
    .bind(new_server.tls_json.as_deref())
    .bind(new_server.unix_json.as_deref())
    .bind(new_server.udp_json.as_deref())
    .bind(new_server.web_id)
    .bind(new_server.reverse_proxy_json.as_deref())
    .bind(&new_server.server_names_json)
    .bind(new_server.is_auditing)
    .bind(new_server.auditing_server_names_json.as_deref())
    .bind(&new_server.dns_name)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_enabled_server(conn: &mut Conn, id: i64) -> Result<Option<ServerRecord>> {
    let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE id = ?1 AND state = ?2");
    let record = sqlx::query_as::<_, ServerRecord>(&sql)
        .bind(id)
        .bind(STATE_ENABLED)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(record)
}

/// Owning cluster regardless of state; zero when the server is unknown.
pub async fn find_server_cluster_id(conn: &mut Conn, id: i64) -> Result<i64> {
    let cluster_id: Option<i64> = sqlx::query_scalar("SELECT cluster_id FROM servers WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(cluster_id.unwrap_or_default())
}

/// Owning user of an enabled server; `None` when missing.
pub async fn find_server_user_id(conn: &mut Conn, id: i64) -> Result<Option<i64>> {
    let user_id = sqlx::query_scalar("SELECT user_id FROM servers WHERE id = ?1 AND state = ?2")
        .bind(id)
        .bind(STATE_ENABLED)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(user_id)
}

pub async fn exists_dns_name(conn: &mut Conn, dns_name: &str) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM servers WHERE dns_name = ?1 LIMIT 1")
            .bind(dns_name)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

pub async fn update_server_basic(
    conn: &mut Conn,
    id: i64,
    name: &str,
    description: &str,
    cluster_id: i64,
    is_on: bool,
    group_ids: &[i64],
) -> Result<u64> {
    let group_ids_json = serde_json::to_string(group_ids)?;
    let result = sqlx::query(
        r#"
        UPDATE servers
        SET name = ?1, description = ?2, cluster_id = ?3, is_on = ?4, group_ids_json = ?5
        WHERE id = ?6 AND state = ?7
        "#,
    )
    .bind(name)
    .bind(description)
    .bind(cluster_id)
    .bind(is_on)
    .bind(group_ids_json)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_server_name(conn: &mut Conn, id: i64, name: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE servers SET name = ?1 WHERE id = ?2 AND state = ?3")
        .bind(name)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn update_server_is_on(conn: &mut Conn, id: i64, is_on: bool) -> Result<u64> {
    let result = sqlx::query("UPDATE servers SET is_on = ?1 WHERE id = ?2 AND state = ?3")
        .bind(is_on)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn update_server_protocol(
    conn: &mut Conn,
    id: i64,
    protocol: ProtocolColumn,
    config_json: &str,
) -> Result<u64> {
    let sql = format!(
        "UPDATE servers SET {} = ?1 WHERE id = ?2 AND state = ?3",
        protocol.column()
    );
    let result = sqlx::query(&sql)
        .bind(config_json)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn update_server_web(conn: &mut Conn, id: i64, web_id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE servers SET web_id = ?1 WHERE id = ?2 AND state = ?3")
        .bind(web_id)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn update_server_reverse_proxy(
    conn: &mut Conn,
    id: i64,
    reverse_proxy_json: &str,
) -> Result<u64> {
    let result =
        sqlx::query("UPDATE servers SET reverse_proxy_json = ?1 WHERE id = ?2 AND state = ?3")
            .bind(reverse_proxy_json)
            .bind(id)
            .bind(STATE_ENABLED)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected())
}

/// Replace the live names and drop any pending submission.
pub async fn update_server_names(conn: &mut Conn, id: i64, names_json: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE servers
        SET server_names_json = ?1, is_auditing = 0
        WHERE id = ?2 AND state = ?3
        "#,
    )
    .bind(names_json)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Park a submission for review; live names stay untouched.
pub async fn submit_auditing_server_names(
    conn: &mut Conn,
    id: i64,
    names_json: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE servers
        SET auditing_server_names_json = ?1, is_auditing = 1
        WHERE id = ?2 AND state = ?3
        "#,
    )
    .bind(names_json)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Promote the pending submission into the live names in one statement.
pub async fn approve_auditing_server_names(
    conn: &mut Conn,
    id: i64,
    result_json: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE servers
        SET server_names_json = COALESCE(auditing_server_names_json, '[]'),
            is_auditing = 0,
            auditing_result_json = ?1
        WHERE id = ?2 AND state = ?3 AND is_auditing = 1
        "#,
    )
    .bind(result_json)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn reject_auditing_server_names(
    conn: &mut Conn,
    id: i64,
    result_json: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE servers
        SET is_auditing = 0, auditing_result_json = ?1
        WHERE id = ?2 AND state = ?3 AND is_auditing = 1
        "#,
    )
    .bind(result_json)
    .bind(id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_server_dns_name(conn: &mut Conn, id: i64, dns_name: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE servers SET dns_name = ?1 WHERE id = ?2 AND state = ?3")
        .bind(dns_name)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn update_user_servers_cluster(
    conn: &mut Conn,
    user_id: i64,
    cluster_id: i64,
) -> Result<u64> {
    let result = sqlx::query("UPDATE servers SET cluster_id = ?1 WHERE user_id = ?2 AND state = ?3")
        .bind(cluster_id)
        .bind(user_id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn disable_server(conn: &mut Conn, id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE servers SET state = ?1 WHERE id = ?2 AND state = ?3")
        .bind(STATE_DISABLED)
        .bind(id)
        .bind(STATE_ENABLED)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn find_server_config_state(
    conn: &mut Conn,
    id: i64,
) -> Result<Option<ServerConfigState>> {
    let state = sqlx::query_as::<_, ServerConfigState>(
        "SELECT config_hash, version FROM servers WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(state)
}

/// Persist a composed config and bump the version. The hash column is only
/// rewritten when `hash` is given. Returns the new version, or `None` when the
/// row does not exist.
pub async fn write_server_config(
    conn: &mut Conn,
    id: i64,
    config_json: &str,
    hash: Option<&str>,
) -> Result<Option<i64>> {
    let version = match hash {
        Some(hash) => {
            sqlx::query_scalar(
                r#"
                UPDATE servers
                SET config_json = ?1, config_hash = ?2, version = version + 1
                WHERE id = ?3
                RETURNING version
                "#,
            )
            .bind(config_json)
            .bind(hash)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        }
        None => {
            sqlx::query_scalar(
                r#"
                UPDATE servers
                SET config_json = ?1, version = version + 1
                WHERE id = ?2
                RETURNING version
                "#,
            )
            .bind(config_json)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    Ok(version)
}

pub async fn list_enabled_server_ids(conn: &mut Conn) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT id FROM servers WHERE state = ?1 ORDER BY id")
        .bind(STATE_ENABLED)
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids)
}

pub async fn list_enabled_server_ids_with_cluster(
    conn: &mut Conn,
    cluster_id: i64,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM servers WHERE cluster_id = ?1 AND state = ?2 ORDER BY id",
    )
    .bind(cluster_id)
    .bind(STATE_ENABLED)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

pub async fn list_enabled_server_ids_with_user(
    conn: &mut Conn,
    user_id: i64,
) -> Result<Vec<i64>> {
    let ids =
        sqlx::query_scalar("SELECT id FROM servers WHERE user_id = ?1 AND state = ?2 ORDER BY id")
            .bind(user_id)
            .bind(STATE_ENABLED)
            .fetch_all(&mut *conn)
            .await?;
    Ok(ids)
}

fn push_match_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ServerMatchFilter) {
    qb.push(" WHERE s.state = ").push_bind(STATE_ENABLED);
    if let Some(keyword) = filter.keyword.as_deref().filter(|k| !k.is_empty()) {
        let pattern = format!("%{keyword}%");
        qb.push(" AND (s.name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR s.server_names_json LIKE ")
            .push_bind(pattern.clone())
            .push(" OR s.dns_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(group_id) = filter.group_id.filter(|id| *id > 0) {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(s.group_ids_json) g WHERE g.value = ")
            .push_bind(group_id)
            .push(")");
    }
    if let Some(user_id) = filter.user_id.filter(|id| *id > 0) {
        qb.push(" AND s.user_id = ").push_bind(user_id);
    }
    if let Some(cluster_id) = filter.cluster_id.filter(|id| *id > 0) {
        qb.push(" AND s.cluster_id = ").push_bind(cluster_id);
    }
    if let Some(is_auditing) = filter.is_auditing {
        qb.push(" AND s.is_auditing = ").push_bind(is_auditing);
    }
    if let Some(family) = filter.protocol_family {
        qb.push(match family {
            ProtocolFamily::Http => {
                " AND (json_extract(s.http_json, '$.isOn') = 1 OR json_extract(s.https_json, '$.isOn') = 1)"
            }
            ProtocolFamily::Tcp => {
                " AND (json_extract(s.tcp_json, '$.isOn') = 1 OR json_extract(s.tls_json, '$.isOn') = 1)"
            }
            ProtocolFamily::Udp => " AND json_extract(s.udp_json, '$.isOn') = 1",
            ProtocolFamily::Unix => " AND json_extract(s.unix_json, '$.isOn') = 1",
        });
    }
}

pub async fn count_servers_match(conn: &mut Conn, filter: &ServerMatchFilter) -> Result<i64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM servers s");
    push_match_filter(&mut qb, filter);
    let count = qb
        .build_query_scalar::<i64>()
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub async fn list_servers_match(
    conn: &mut Conn,
    filter: &ServerMatchFilter,
    limit: u32,
    offset: u32,
) -> Result<Vec<ServerListRow>> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT
            s.id,
            s.user_id,
            s.type,
            s.name,
            s.cluster_id,
            s.is_on,
            s.is_auditing,
            s.dns_name,
            s.version
        FROM servers s
        "#,
    );
    push_match_filter(&mut qb, filter);
    qb.push(" ORDER BY s.id DESC");
    qb.push(" LIMIT ").push_bind(limit as i64);
    qb.push(" OFFSET ").push_bind(offset as i64);

    let rows = qb
        .build_query_as::<ServerListRow>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Whether `name` is already served by another enabled server in the
/// cluster, either as a top-level name or as a grouped sub name.
pub async fn exists_server_name_in_cluster(
    conn: &mut Conn,
    cluster_id: i64,
    name: &str,
    exclude_server_id: i64,
) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1
        FROM servers s, json_each(s.server_names_json) sn
        WHERE s.cluster_id = ?1
          AND s.state = ?2
          AND s.id != ?3
          AND (
              json_extract(sn.value, '$.name') = ?4
              OR EXISTS (
                  SELECT 1 FROM json_each(json_extract(sn.value, '$.subNames')) sub
                  WHERE sub.value = ?4
              )
          )
        LIMIT 1
        "#,
    )
    .bind(cluster_id)
    .bind(STATE_ENABLED)
    .bind(exclude_server_id)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found.is_some())
}

/// DNS names of live servers in a cluster; servers waiting on review are
/// left out.
pub async fn list_server_dns_with_cluster(
    conn: &mut Conn,
    cluster_id: i64,
) -> Result<Vec<ServerDnsRecord>> {
    let records = sqlx::query_as::<_, ServerDnsRecord>(
        r#"
        SELECT id, cluster_id, dns_name
        FROM servers
        WHERE cluster_id = ?1 AND state = ?2 AND is_auditing = 0 AND dns_name != ''
        ORDER BY id
        "#,
    )
    .bind(cluster_id)
    .bind(STATE_ENABLED)
    .fetch_all(&mut *conn)
    .await?;
    Ok(records)
}

pub async fn list_cluster_server_configs(
    conn: &mut Conn,
    cluster_id: i64,
) -> Result<Vec<ServerConfigRow>> {
    let rows = sqlx::query_as::<_, ServerConfigRow>(
        r#"
        SELECT id, version, config_json
        FROM servers
        WHERE cluster_id = ?1 AND state = ?2
        ORDER BY id
        "#,
    )
    .bind(cluster_id)
    .bind(STATE_ENABLED)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{migrations, Db};

    async fn setup_db() -> Db {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        db
    }

    fn new_server(cluster_id: i64, dns_name: &str, names: &str) -> NewServer {
        NewServer {
            user_id: 7,
            kind: "httpProxy".into(),
            name: format!("site-{dns_name}"),
            cluster_id,
            group_ids: vec![2, 3],
            http_json: Some(r#"{"isOn":true}"#.into()),
            server_names_json: names.into(),
            dns_name: dns_name.into(),
            ..NewServer::default()
        }
    }

    #[tokio::test]
    async fn config_write_bumps_version_and_optionally_hash() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let id = create_server(&mut conn, new_server(1, "aaaa0001", "[]"))
            .await
            .expect("create");

        let state = find_server_config_state(&mut conn, id)
            .await
            .expect("state")
            .expect("present");
        assert_eq!(state.version, 1);
        assert!(state.config_hash.is_empty());

        let version = write_server_config(&mut conn, id, "{}", Some("h1"))
            .await
            .expect("write");
        assert_eq!(version, Some(2));
        let version = write_server_config(&mut conn, id, "{}", None)
            .await
            .expect("write");
        assert_eq!(version, Some(3));

        let state = find_server_config_state(&mut conn, id)
            .await
            .expect("state")
            .expect("present");
        assert_eq!(state.config_hash, "h1");
        assert_eq!(state.version, 3);

        assert_eq!(
            write_server_config(&mut conn, 404, "{}", None)
                .await
                .expect("write"),
            None
        );
    }

    #[tokio::test]
    async fn auditing_promotion_is_atomic() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let id = create_server(
            &mut conn,
            new_server(1, "aaaa0002", r#"[{"name":"old.example.com"}]"#),
        )
        .await
        .expect("create");

        submit_auditing_server_names(&mut conn, id, r#"[{"name":"new.example.com"}]"#)
            .await
            .expect("submit");
        let server = get_enabled_server(&mut conn, id)
            .await
            .expect("get")
            .expect("present");
        assert!(server.is_auditing);
        assert_eq!(server.server_names_json, r#"[{"name":"old.example.com"}]"#);

        approve_auditing_server_names(&mut conn, id, r#"{"isOk":true}"#)
            .await
            .expect("approve");
        let server = get_enabled_server(&mut conn, id)
            .await
            .expect("get")
            .expect("present");
        assert!(!server.is_auditing);
        assert_eq!(server.server_names_json, r#"[{"name":"new.example.com"}]"#);

        // Nothing pending any more, so a second decision is a no-op.
        assert_eq!(
            reject_auditing_server_names(&mut conn, id, r#"{"isOk":false}"#)
                .await
                .expect("reject"),
            0
        );
    }

    #[tokio::test]
    async fn name_lookup_covers_sub_names_and_excludes_self() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let id = create_server(
            &mut conn,
            new_server(
                1,
                "aaaa0003",
                r#"[{"name":"a.example.com"},{"name":"","subNames":["b.example.com"]}]"#,
            ),
        )
        .await
        .expect("create");

        assert!(exists_server_name_in_cluster(&mut conn, 1, "a.example.com", 0)
            .await
            .expect("lookup"));
        assert!(exists_server_name_in_cluster(&mut conn, 1, "b.example.com", 0)
            .await
            .expect("lookup"));
        assert!(!exists_server_name_in_cluster(&mut conn, 1, "a.example.com", id)
            .await
            .expect("lookup"));
        assert!(!exists_server_name_in_cluster(&mut conn, 2, "a.example.com", 0)
            .await
            .expect("lookup"));
    }

    #[tokio::test]
    async fn match_filter_combines_predicates() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        create_server(&mut conn, new_server(1, "aaaa0004", "[]"))
            .await
            .expect("create");
        let mut tcp_only = new_server(2, "aaaa0005", "[]");
        tcp_only.http_json = None;
        tcp_only.tcp_json = Some(r#"{"isOn":true}"#.into());
        tcp_only.group_ids = vec![9];
        create_server(&mut conn, tcp_only).await.expect("create");

        let all = ServerMatchFilter::default();
        assert_eq!(count_servers_match(&mut conn, &all).await.expect("count"), 2);

        let by_group = ServerMatchFilter {
            group_id: Some(9),
            ..ServerMatchFilter::default()
        };
        let rows = list_servers_match(&mut conn, &by_group, 10, 0)
            .await
            .expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dns_name, "aaaa0005");

        let http = ServerMatchFilter {
            protocol_family: Some(ProtocolFamily::Http),
            ..ServerMatchFilter::default()
        };
        assert_eq!(count_servers_match(&mut conn, &http).await.expect("count"), 1);

        let keyword = ServerMatchFilter {
            keyword: Some("aaaa0004".into()),
            ..ServerMatchFilter::default()
        };
        assert_eq!(
            count_servers_match(&mut conn, &keyword).await.expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn dns_listing_skips_auditing_and_disabled_servers() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let live = create_server(&mut conn, new_server(1, "aaaa0006", "[]"))
            .await
            .expect("create");
        let pending = create_server(&mut conn, new_server(1, "aaaa0007", "[]"))
            .await
            .expect("create");
        let gone = create_server(&mut conn, new_server(1, "aaaa0008", "[]"))
            .await
            .expect("create");
        submit_auditing_server_names(&mut conn, pending, "[]")
            .await
            .expect("submit");
        disable_server(&mut conn, gone).await.expect("disable");

        let records = list_server_dns_with_cluster(&mut conn, 1)
            .await
            .expect("list");
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![live]);
        assert_eq!(find_server_cluster_id(&mut conn, gone).await.expect("id"), 1);
    }
}
