use chrono::Utc;
use common::{
    api::{AuditingResult, NodeTaskType, Page},
    config::{ReverseProxyRef, ServerConfig, ServerNameConfig},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::{
    app_state::AppState,
    auditing::{self, NamesState},
    auth::Caller,
    composer,
    error::{invalid_argument, not_found, permission_denied, require_id, ApiResult},
    persistence::{
        clusters, dns_domains, node_tasks, policies,
        servers::{self, NewServer, ProtocolColumn, ServerDnsRecord, ServerListRow, ServerMatchFilter},
        users, Conn,
    },
    propagation,
    services::{page_limit, server_for_caller},
    validation::{self, NULL_JSON},
};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateServerRequest {
    /// Owner; only honoured for administrators.
    #[serde(default)]
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Zero lets a user fall back to their assigned cluster.
    #[serde(default)]
    pub cluster_id: i64,
    #[serde(default)]
    pub group_ids: Vec<i64>,
    #[serde(default)]
    pub server_names: Option<Value>,
    #[serde(default)]
    pub http: Option<Value>,
    #[serde(default)]
    pub https: Option<Value>,
    #[serde(default)]
    pub tcp: Option<Value>,
    #[serde(default)]
    pub tls: Option<Value>,
    #[serde(default)]
    pub unix: Option<Value>,
    #[serde(default)]
    pub udp: Option<Value>,
    #[serde(default)]
    pub web_id: i64,
    #[serde(default)]
    pub reverse_proxy: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerCreated {
    pub server_id: i64,
    pub dns_name: String,
    pub is_auditing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateServerBasicRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cluster_id: i64,
    pub is_on: bool,
    #[serde(default)]
    pub group_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerNamesView {
    pub server_names: Vec<ServerNameConfig>,
    pub is_auditing: bool,
    pub auditing_server_names: Vec<ServerNameConfig>,
    pub auditing_result: Option<AuditingResult>,
    pub state: NamesState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerDnsView {
    pub server_id: i64,
    pub dns_name: String,
    pub cluster_id: i64,
    pub cluster_dns_name: String,
    pub domain_id: i64,
    pub domain_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListServersRequest {
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub cluster_id: Option<i64>,
    #[serde(default)]
    pub is_auditing: Option<bool>,
    #[serde(default)]
    pub protocol_family: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

fn require_manager(caller: &Caller) -> crate::Result<()> {
    match caller {
        Caller::Node { .. } => Err(permission_denied("nodes cannot manage servers")),
        _ => Ok(()),
    }
}

fn raw_json(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(raw)) => raw.clone(),
        Some(value) => value.to_string(),
        None => String::new(),
    }
}

/// Validate a protocol blob and, for users, the SSL policy it references.
async fn checked_protocol(
    conn: &mut Conn,
    caller: &Caller,
    column: ProtocolColumn,
    value: Option<&Value>,
) -> crate::Result<Option<String>> {
    let blob = validation::normalize_protocol_json(column, &raw_json(value))?;
    if let (Caller::User { id }, Some(policy_id)) = (caller, blob.ssl_policy_id) {
        if !policies::check_user_ssl_policy(conn, *id, policy_id).await? {
            return Err(permission_denied(format!(
                "ssl policy {policy_id} belongs to another user"
            )));
        }
    }
    Ok((blob.json != NULL_JSON).then_some(blob.json))
}

fn checked_reverse_proxy(value: Option<&Value>) -> crate::Result<Option<String>> {
    let raw = raw_json(value);
    if !composer::is_present(Some(raw.as_str())) {
        return Ok(None);
    }
    let parsed: ReverseProxyRef = serde_json::from_str(&raw)
        .map_err(|err| invalid_argument(format!("invalid reverse proxy: {err}")))?;
    Ok(Some(serde_json::to_string(&parsed)?))
}

async fn ensure_cluster(conn: &mut Conn, cluster_id: i64) -> crate::Result<()> {
    require_id(cluster_id, "cluster")?;
    if !clusters::exists_enabled_cluster(conn, cluster_id).await? {
        return Err(not_found("cluster"));
    }
    Ok(())
}

async fn notify_server(conn: &mut Conn, server_id: i64) -> crate::Result<()> {
    propagation::notify_update(conn, server_id).await?;
    propagation::notify_dns_update(conn, server_id).await?;
    Ok(())
}

pub async fn create_server(
    state: &AppState,
    caller: &Caller,
    req: CreateServerRequest,
) -> ApiResult<ServerCreated> {
    require_manager(caller)?;
    let max_len = state.limits.max_field_len;
    validation::validate_required_str("name", &req.name, max_len)?;
    validation::validate_required_str("type", &req.kind, max_len)?;
    validation::validate_opt_str(
        "description",
        Some(req.description.as_str()).filter(|d| !d.is_empty()),
        max_len,
    )?;

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;

    let (admin_id, user_id) = if caller.is_admin() {
        (caller.admin_id(), req.user_id.max(0))
    } else {
        (0, caller.user_id())
    };

    let mut cluster_id = req.cluster_id;
    if cluster_id <= 0 && user_id > 0 {
        cluster_id = users::get_enabled_user(&mut tx, user_id)
            .await?
            .map(|user| user.cluster_id)
            .unwrap_or_default();
    }
    ensure_cluster(&mut tx, cluster_id).await?;

    let names = validation::normalize_server_names(&raw_json(req.server_names.as_ref()), max_len)?;
    let names_json = serde_json::to_string(&names).map_err(anyhow::Error::from)?;

    let http_json = checked_protocol(&mut tx, caller, ProtocolColumn::Http, req.http.as_ref()).await?;
    let https_json =
        checked_protocol(&mut tx, caller, ProtocolColumn::Https, req.https.as_ref()).await?;
    let tcp_json = checked_protocol(&mut tx, caller, ProtocolColumn::Tcp, req.tcp.as_ref()).await?;
    let tls_json = checked_protocol(&mut tx, caller, ProtocolColumn::Tls, req.tls.as_ref()).await?;
    let unix_json = checked_protocol(&mut tx, caller, ProtocolColumn::Unix, req.unix.as_ref()).await?;
    let udp_json = checked_protocol(&mut tx, caller, ProtocolColumn::Udp, req.udp.as_ref()).await?;
    let reverse_proxy_json = checked_reverse_proxy(req.reverse_proxy.as_ref())?;

    let global = auditing::read_global_config(&mut tx).await?;
    let is_auditing = !names.is_empty() && auditing::requires_review(&global, caller, user_id);
    let (server_names_json, auditing_server_names_json) = if is_auditing {
        ("[]".to_string(), Some(names_json))
    } else {
        (names_json, None)
    };

    let dns_name =
        propagation::generate_server_dns_name(&mut tx, state.unique_values.as_ref()).await?;

    let server_id = servers::create_server(
        &mut tx,
        NewServer {
            admin_id,
            user_id,
            kind: req.kind.trim().to_string(),
            name: req.name.trim().to_string(),
            description: req.description,
            cluster_id,
            group_ids: req.group_ids,
            http_json,
            https_json,
            tcp_json,
            tls_json,
            unix_json,
            udp_json,
            web_id: req.web_id.max(0),
            reverse_proxy_json,
            server_names_json,
            is_auditing,
            auditing_server_names_json,
            dns_name: dns_name.clone(),
        },
    )
    .await?;

    notify_server(&mut tx, server_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    info!(server_id, cluster_id, user_id, is_auditing, "server created");
    Ok(ServerCreated {
        server_id,
        dns_name,
        is_auditing,
    })
}

pub async fn update_server_basic(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
    req: UpdateServerBasicRequest,
) -> ApiResult<()> {
    caller.require_admin()?;
    validation::validate_required_str("name", &req.name, state.limits.max_field_len)?;

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let record = server_for_caller(&mut tx, caller, server_id).await?;
    ensure_cluster(&mut tx, req.cluster_id).await?;
    let cluster_changed = record.cluster_id != req.cluster_id;
    if cluster_changed {
        propagation::notify_dns_update(&mut tx, server_id).await?;
    }

    servers::update_server_basic(
        &mut tx,
        server_id,
        req.name.trim(),
        &req.description,
        req.cluster_id,
        req.is_on,
        &req.group_ids,
    )
    .await?;

    if cluster_changed {
        if record.cluster_id > 0 {
            node_tasks::create_cluster_task(&mut tx, record.cluster_id, NodeTaskType::ConfigChanged)
                .await?;
        }
        node_tasks::create_cluster_task(&mut tx, req.cluster_id, NodeTaskType::ConfigChanged)
            .await?;
    }
    notify_server(&mut tx, server_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

/// Users may only rename their servers.
pub async fn update_user_server_basic(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
    name: &str,
) -> ApiResult<()> {
    require_manager(caller)?;
    validation::validate_required_str("name", name, state.limits.max_field_len)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    server_for_caller(&mut tx, caller, server_id).await?;
    servers::update_server_name(&mut tx, server_id, name.trim()).await?;
    propagation::notify_update(&mut tx, server_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn update_server_is_on(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
    is_on: bool,
) -> ApiResult<()> {
    require_manager(caller)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    server_for_caller(&mut tx, caller, server_id).await?;
    servers::update_server_is_on(&mut tx, server_id, is_on).await?;
    notify_server(&mut tx, server_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

/// Replace one protocol blob. Empty input clears the protocol.
pub async fn update_server_protocol(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
    column: ProtocolColumn,
    value: Option<Value>,
) -> ApiResult<()> {
    require_manager(caller)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    server_for_caller(&mut tx, caller, server_id).await?;
    let json = checked_protocol(&mut tx, caller, column, value.as_ref()).await?;
    servers::update_server_protocol(&mut tx, server_id, column, json.as_deref().unwrap_or(NULL_JSON))
        .await?;
    propagation::notify_update(&mut tx, server_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn update_server_web(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
    web_id: i64,
) -> ApiResult<()> {
    require_manager(caller)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    server_for_caller(&mut tx, caller, server_id).await?;
    if web_id > 0 {
        let web = policies::get_enabled_web(&mut tx, web_id)
            .await?
            .ok_or_else(|| not_found("web config"))?;
        if let Caller::User { id } = caller {
            if web.user_id != *id {
                return Err(permission_denied("web config belongs to another user").into());
            }
        }
    }
    servers::update_server_web(&mut tx, server_id, web_id.max(0)).await?;
    propagation::notify_update(&mut tx, server_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn update_server_reverse_proxy(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
    value: Option<Value>,
) -> ApiResult<()> {
    require_manager(caller)?;
    let json = checked_reverse_proxy(value.as_ref())?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    server_for_caller(&mut tx, caller, server_id).await?;
    servers::update_server_reverse_proxy(&mut tx, server_id, json.as_deref().unwrap_or(NULL_JSON))
        .await?;
    propagation::notify_update(&mut tx, server_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

fn decode_names(field: &'static str, raw: Option<&str>) -> crate::Result<Vec<ServerNameConfig>> {
    match raw {
        Some(raw) if composer::is_present(Some(raw)) => {
            serde_json::from_str(raw).map_err(|err| crate::error::malformed(field, err))
        }
        _ => Ok(Vec::new()),
    }
}

pub async fn find_server_names(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
) -> ApiResult<ServerNamesView> {
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let record = server_for_caller(&mut conn, caller, server_id).await?;
    Ok(ServerNamesView {
        server_names: decode_names("server names", Some(record.server_names_json.as_str()))?,
        is_auditing: record.is_auditing,
        auditing_server_names: decode_names(
            "auditing server names",
            record.auditing_server_names_json.as_deref(),
        )?,
        auditing_result: auditing::last_result(&record)?,
        state: NamesState::of(&record)?,
    })
}

/// Change the names of a server. User changes go through review while the
/// platform requires it; everything else goes live at once.
pub async fn update_server_names(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
    names: Option<Value>,
) -> ApiResult<NamesState> {
    require_manager(caller)?;
    let names =
        validation::normalize_server_names(&raw_json(names.as_ref()), state.limits.max_field_len)?;
    let names_json = serde_json::to_string(&names).map_err(anyhow::Error::from)?;

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let record = server_for_caller(&mut tx, caller, server_id).await?;
    let global = auditing::read_global_config(&mut tx).await?;

    let names_state = if auditing::requires_review(&global, caller, record.user_id) {
        servers::submit_auditing_server_names(&mut tx, server_id, &names_json).await?;
        propagation::notify_update(&mut tx, server_id).await?;
        NamesState::Pending
    } else {
        servers::update_server_names(&mut tx, server_id, &names_json).await?;
        notify_server(&mut tx, server_id).await?;
        NamesState::Live
    };
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(names_state)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewServerNamesRequest {
    pub is_ok: bool,
    #[serde(default)]
    pub reason: String,
}

pub async fn review_server_names(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
    req: ReviewServerNamesRequest,
) -> ApiResult<NamesState> {
    caller.require_admin()?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let names_state =
        auditing::review_server_names(&mut tx, server_id, req.is_ok, &req.reason, Utc::now())
            .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(names_state)
}

pub async fn disable_server(state: &AppState, caller: &Caller, server_id: i64) -> ApiResult<()> {
    require_manager(caller)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    server_for_caller(&mut tx, caller, server_id).await?;
    servers::disable_server(&mut tx, server_id).await?;
    notify_server(&mut tx, server_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    info!(server_id, "server disabled");
    Ok(())
}

/// Assign a fresh DNS name to a server.
pub async fn regenerate_server_dns_name(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
) -> ApiResult<String> {
    caller.require_admin()?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    server_for_caller(&mut tx, caller, server_id).await?;
    let dns_name =
        propagation::generate_server_dns_name(&mut tx, state.unique_values.as_ref()).await?;
    servers::update_server_dns_name(&mut tx, server_id, &dns_name).await?;
    notify_server(&mut tx, server_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(dns_name)
}

pub async fn find_server_config(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
) -> ApiResult<ServerConfig> {
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    server_for_caller(&mut conn, caller, server_id).await?;
    Ok(composer::compose_server_config(&mut conn, server_id).await?)
}

fn match_filter(caller: &Caller, req: &ListServersRequest) -> crate::Result<ServerMatchFilter> {
    let user_id = match caller {
        Caller::Admin { .. } => req.user_id.filter(|id| *id > 0),
        Caller::User { id } => Some(*id),
        Caller::Node { .. } => return Err(permission_denied("nodes cannot list servers")),
    };
    Ok(ServerMatchFilter {
        keyword: req
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string),
        group_id: req.group_id.filter(|id| *id > 0),
        user_id,
        cluster_id: req.cluster_id.filter(|id| *id > 0),
        is_auditing: req.is_auditing,
        protocol_family: req
            .protocol_family
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(str::parse)
            .transpose()?,
    })
}

pub async fn count_servers_match(
    state: &AppState,
    caller: &Caller,
    req: &ListServersRequest,
) -> ApiResult<i64> {
    let filter = match_filter(caller, req)?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(servers::count_servers_match(&mut conn, &filter).await?)
}

pub async fn list_servers_match(
    state: &AppState,
    caller: &Caller,
    req: &ListServersRequest,
) -> ApiResult<Page<ServerListRow>> {
    let filter = match_filter(caller, req)?;
    let limit = page_limit(req.limit, state.limits.list_limit);
    let offset = req.offset.unwrap_or(0);
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let items = servers::list_servers_match(&mut conn, &filter, limit, offset).await?;
    Ok(Page {
        limit,
        offset,
        items,
    })
}

/// Names from `names` already served by another server of the cluster.
pub async fn check_server_name_duplication(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
    names: &[String],
    exclude_server_id: i64,
) -> ApiResult<Vec<String>> {
    require_manager(caller)?;
    require_id(cluster_id, "cluster")?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let mut duplicates = Vec::new();
    for name in names {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() || duplicates.contains(&name) {
            continue;
        }
        if servers::exists_server_name_in_cluster(&mut conn, cluster_id, &name, exclude_server_id)
            .await?
        {
            duplicates.push(name);
        }
    }
    Ok(duplicates)
}

/// Ask every cluster to re-pull server configs.
pub async fn notify_servers_change(state: &AppState, caller: &Caller) -> ApiResult<usize> {
    caller.require_admin()?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let cluster_ids = clusters::list_enabled_cluster_ids(&mut tx).await?;
    for cluster_id in &cluster_ids {
        node_tasks::create_cluster_task(&mut tx, *cluster_id, NodeTaskType::ConfigChanged).await?;
    }
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(cluster_ids.len())
}

pub async fn find_all_servers_dns_with_cluster(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
) -> ApiResult<Vec<ServerDnsRecord>> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(servers::list_server_dns_with_cluster(&mut conn, cluster_id).await?)
}

pub async fn find_server_dns(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
) -> ApiResult<ServerDnsView> {
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let record = server_for_caller(&mut conn, caller, server_id).await?;
    let mut view = ServerDnsView {
        server_id,
        dns_name: record.dns_name,
        cluster_id: record.cluster_id,
        cluster_dns_name: String::new(),
        domain_id: 0,
        domain_name: String::new(),
    };
    if let Some(binding) = clusters::find_cluster_dns(&mut conn, record.cluster_id).await? {
        view.cluster_dns_name = binding.dns_name;
        view.domain_id = binding.dns_domain_id;
        if binding.dns_domain_id > 0 {
            if let Some(domain) =
                dns_domains::get_enabled_domain(&mut conn, binding.dns_domain_id).await?
            {
                view.domain_name = domain.name;
            }
        }
    }
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        persistence::{dns_tasks, settings},
        services::{
            sync,
            test_support::{seed_cluster, setup_state, setup_state_with},
        },
        tokens::UniqueValueSource,
    };
    use axum::http::StatusCode;
    use common::config::ClusterDnsConfig;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const ADMIN: Caller = Caller::Admin { id: 1 };
    const USER: Caller = Caller::User { id: 7 };

    fn request(cluster_id: i64, names: Value) -> CreateServerRequest {
        CreateServerRequest {
            user_id: 0,
            kind: "httpProxy".into(),
            name: "shop".into(),
            description: String::new(),
            cluster_id,
            group_ids: vec![3],
            server_names: Some(names),
            http: Some(json!({"isOn": true, "listen": [{"protocol": "http", "portRange": "80"}]})),
            https: None,
            tcp: None,
            tls: None,
            unix: None,
            udp: None,
            web_id: 0,
            reverse_proxy: None,
        }
    }

    async fn enable_auditing(state: &AppState) {
        let mut conn = state.db.acquire().await.expect("conn");
        settings::update_setting(
            &mut conn,
            settings::SERVER_GLOBAL_CONFIG,
            br#"{"httpAll":{"domainAuditingIsOn":true}}"#,
        )
        .await
        .expect("setting");
    }

    #[tokio::test]
    async fn create_server_composes_and_queues_a_task() {
        let state = setup_state().await;
        let cluster_id = {
            let mut conn = state.db.acquire().await.expect("conn");
            seed_cluster(&mut conn, "edge").await
        };

        let created = create_server(&state, &ADMIN, request(cluster_id, json!([{"name": "Shop.example.com"}])))
            .await
            .expect("create");
        assert_eq!(created.dns_name.len(), 8);
        assert!(!created.is_auditing);

        let config = find_server_config(&state, &ADMIN, created.server_id)
            .await
            .expect("config");
        assert_eq!(config.server_names[0].name, "shop.example.com");
        assert!(config.http.is_some());

        let mut conn = state.db.acquire().await.expect("conn");
        assert_eq!(
            node_tasks::count_cluster_tasks(&mut conn, cluster_id)
                .await
                .expect("count"),
            1
        );
        let stored = servers::find_server_config_state(&mut conn, created.server_id)
            .await
            .expect("state")
            .expect("row");
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn user_names_go_through_review_when_enabled() {
        let state = setup_state().await;
        let cluster_id = {
            let mut conn = state.db.acquire().await.expect("conn");
            let cluster_id = seed_cluster(&mut conn, "edge").await;
            sqlx::query("INSERT INTO users (id, username, cluster_id, state) VALUES (7, 'alice', ?1, 1)")
                .bind(cluster_id)
                .execute(&mut *conn)
                .await
                .expect("user");
            cluster_id
        };
        enable_auditing(&state).await;

        let created = create_server(&state, &USER, request(0, json!([{"name": "a.example.com"}])))
            .await
            .expect("create");
        assert!(created.is_auditing);

        let view = find_server_names(&state, &USER, created.server_id)
            .await
            .expect("names");
        assert!(view.server_names.is_empty());
        assert_eq!(view.auditing_server_names[0].name, "a.example.com");
        assert_eq!(view.state, NamesState::Pending);

        let names_state = review_server_names(
            &state,
            &ADMIN,
            created.server_id,
            ReviewServerNamesRequest {
                is_ok: true,
                reason: String::new(),
            },
        )
        .await
        .expect("approve");
        assert_eq!(names_state, NamesState::Approved);

        let config = find_server_config(&state, &USER, created.server_id)
            .await
            .expect("config");
        assert_eq!(config.server_names[0].name, "a.example.com");

        let live = update_server_names(
            &state,
            &ADMIN,
            created.server_id,
            Some(json!([{"name": "b.example.com"}])),
        )
        .await
        .expect("admin change");
        assert_eq!(live, NamesState::Live);

        let mut conn = state.db.acquire().await.expect("conn");
        assert!(node_tasks::count_cluster_tasks(&mut conn, cluster_id)
            .await
            .expect("count")
            >= 2);
    }

    #[tokio::test]
    async fn users_cannot_touch_foreign_servers() {
        let state = setup_state().await;
        let cluster_id = {
            let mut conn = state.db.acquire().await.expect("conn");
            seed_cluster(&mut conn, "edge").await
        };
        let created = create_server(&state, &ADMIN, request(cluster_id, json!([])))
            .await
            .expect("create");

        let err = update_server_is_on(&state, &USER, created.server_id, false)
            .await
            .expect_err("foreign");
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let err = update_server_basic(
            &state,
            &USER,
            created.server_id,
            UpdateServerBasicRequest {
                name: "x".into(),
                description: String::new(),
                cluster_id,
                is_on: true,
                group_ids: Vec::new(),
            },
        )
        .await
        .expect_err("admin only");
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let err = update_server_is_on(&state, &ADMIN, 0, false)
            .await
            .expect_err("bad id");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn disable_creates_dns_task_only_for_bound_clusters() {
        let state = setup_state().await;
        let (plain, bound) = {
            let mut conn = state.db.acquire().await.expect("conn");
            let plain = seed_cluster(&mut conn, "plain").await;
            let bound = seed_cluster(&mut conn, "bound").await;
            let domain_id = dns_domains::create_domain(&mut conn, "example.net")
                .await
                .expect("domain");
            clusters::update_dns(&mut conn, bound, domain_id, "cdn", &ClusterDnsConfig::default())
                .await
                .expect("bind");
            (plain, bound)
        };

        let plain_server = create_server(&state, &ADMIN, request(plain, json!([])))
            .await
            .expect("plain");
        let bound_server = create_server(&state, &ADMIN, request(bound, json!([])))
            .await
            .expect("bound");

        let dns_before = {
            let mut conn = state.db.acquire().await.expect("conn");
            dns_tasks::count_dns_tasks(&mut conn).await.expect("count")
        };
        assert_eq!(dns_before, 1);

        disable_server(&state, &ADMIN, plain_server.server_id)
            .await
            .expect("disable plain");
        disable_server(&state, &ADMIN, bound_server.server_id)
            .await
            .expect("disable bound");

        let mut conn = state.db.acquire().await.expect("conn");
        assert_eq!(dns_tasks::count_dns_tasks(&mut conn).await.expect("count"), 2);
        assert_eq!(
            node_tasks::count_cluster_tasks(&mut conn, plain)
                .await
                .expect("count"),
            2
        );
    }

    #[tokio::test]
    async fn moving_a_server_resyncs_both_zones() {
        let state = setup_state().await;
        let (old_cluster, new_cluster, old_domain, new_domain) = {
            let mut conn = state.db.acquire().await.expect("conn");
            let old_cluster = seed_cluster(&mut conn, "old").await;
            let new_cluster = seed_cluster(&mut conn, "new").await;
            let old_domain = dns_domains::create_domain(&mut conn, "old.net")
                .await
                .expect("domain");
            let new_domain = dns_domains::create_domain(&mut conn, "new.net")
                .await
                .expect("domain");
            for (cluster_id, domain_id) in [(old_cluster, old_domain), (new_cluster, new_domain)] {
                clusters::update_dns(
                    &mut conn,
                    cluster_id,
                    domain_id,
                    "cdn",
                    &ClusterDnsConfig::default(),
                )
                .await
                .expect("bind");
            }
            (old_cluster, new_cluster, old_domain, new_domain)
        };

        let created = create_server(&state, &ADMIN, request(old_cluster, json!([])))
            .await
            .expect("create");
        update_server_basic(
            &state,
            &ADMIN,
            created.server_id,
            UpdateServerBasicRequest {
                name: "shop".into(),
                description: String::new(),
                cluster_id: new_cluster,
                is_on: true,
                group_ids: vec![3],
            },
        )
        .await
        .expect("move");

        let mut conn = state.db.acquire().await.expect("conn");
        let dns = dns_tasks::list_dns_tasks_after(&mut conn, 0, 10)
            .await
            .expect("dns tasks");
        let targets: Vec<_> = dns
            .iter()
            .map(|task| (task.cluster_id, task.domain_id))
            .collect();
        assert_eq!(
            targets,
            vec![
                (old_cluster, old_domain),
                (old_cluster, old_domain),
                (new_cluster, new_domain),
            ]
        );
        drop(conn);

        let items = sync::cluster_server_configs(&state, &ADMIN, Some(new_cluster))
            .await
            .expect("configs");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].version, 3);
        let config = items[0].config.as_ref().expect("config");
        assert_eq!(
            config.alias_server_names,
            vec![format!("{}.new.net", created.dns_name)]
        );
    }

    struct Colliding(Mutex<Vec<&'static str>>);

    impl UniqueValueSource for Colliding {
        fn next_hex(&self, _len: usize) -> String {
            let mut values = self.0.lock().expect("lock");
            if values.len() > 1 {
                values.remove(0).to_string()
            } else {
                values[0].to_string()
            }
        }
    }

    #[tokio::test]
    async fn dns_names_are_retried_on_collision() {
        let source = Arc::new(Colliding(Mutex::new(vec!["aaaa0000", "aaaa0000", "bbbb0000"])));
        let state = setup_state_with(source).await;
        let cluster_id = {
            let mut conn = state.db.acquire().await.expect("conn");
            seed_cluster(&mut conn, "edge").await
        };
        let first = create_server(&state, &ADMIN, request(cluster_id, json!([])))
            .await
            .expect("first");
        let second = create_server(&state, &ADMIN, request(cluster_id, json!([])))
            .await
            .expect("second");
        assert_eq!(first.dns_name, "aaaa0000");
        assert_eq!(second.dns_name, "bbbb0000");
    }

    #[tokio::test]
    async fn listing_is_scoped_and_duplicates_are_reported() {
        let state = setup_state().await;
        let cluster_id = {
            let mut conn = state.db.acquire().await.expect("conn");
            seed_cluster(&mut conn, "edge").await
        };
        create_server(&state, &ADMIN, request(cluster_id, json!([{"name": "a.example.com"}])))
            .await
            .expect("admin server");
        let mut owned = request(cluster_id, json!([]));
        owned.name = "mine".into();
        create_server(&state, &USER, owned).await.expect("user server");

        let all = ListServersRequest::default();
        assert_eq!(count_servers_match(&state, &ADMIN, &all).await.expect("count"), 2);
        let page = list_servers_match(&state, &USER, &all).await.expect("list");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "mine");

        let duplicates = check_server_name_duplication(
            &state,
            &ADMIN,
            cluster_id,
            &["A.example.com".to_string(), "free.example.com".to_string()],
            0,
        )
        .await
        .expect("duplicates");
        assert_eq!(duplicates, vec!["a.example.com".to_string()]);
    }
}
