use common::{
    api::NodeTaskType,
    config::{ClusterDnsConfig, HealthCheckConfig, ToaConfig},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    app_state::AppState,
    auth::Caller,
    error::{not_found, require_id, ApiResult},
    persistence::{
        clusters::{self, NewCluster},
        dns_domains, node_tasks, servers, users, Conn,
    },
    propagation,
    tokens::{generate_token, hash_token, CLUSTER_SECRET_LEN},
    validation,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
}

/// Credentials of a new cluster. The secret is never shown again.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterCreated {
    pub cluster_id: i64,
    pub unique_id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateClusterDnsRequest {
    #[serde(default)]
    pub dns_domain_id: i64,
    #[serde(default)]
    pub dns_name: String,
    #[serde(default = "default_true")]
    pub nodes_auto_sync: bool,
    #[serde(default = "default_true")]
    pub servers_auto_sync: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterDnsView {
    pub cluster_id: i64,
    pub dns_domain_id: i64,
    pub dns_domain_name: String,
    pub dns_name: String,
    pub nodes_auto_sync: bool,
    pub servers_auto_sync: bool,
}

async fn ensure_cluster(conn: &mut Conn, cluster_id: i64) -> crate::Result<()> {
    require_id(cluster_id, "cluster")?;
    if !clusters::exists_enabled_cluster(conn, cluster_id).await? {
        return Err(not_found("cluster"));
    }
    Ok(())
}

fn require_updated(rows: u64) -> crate::Result<()> {
    if rows == 0 {
        return Err(not_found("cluster"));
    }
    Ok(())
}

pub async fn create_cluster(
    state: &AppState,
    caller: &Caller,
    req: CreateClusterRequest,
) -> ApiResult<ClusterCreated> {
    let admin_id = caller.require_admin()?;
    validation::validate_required_str("name", &req.name, state.limits.max_field_len)?;

    let secret = generate_token(CLUSTER_SECRET_LEN);
    let secret_hash = hash_token(&secret, &state.token_pepper)?;

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let unique_id =
        propagation::generate_cluster_unique_id(&mut tx, state.unique_values.as_ref()).await?;
    let cluster_id = clusters::create_cluster(
        &mut tx,
        NewCluster {
            admin_id,
            name: req.name.trim().to_string(),
            unique_id: unique_id.clone(),
            secret_hash,
            dns: ClusterDnsConfig::default(),
        },
    )
    .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    info!(cluster_id, unique_id = %unique_id, "cluster created");
    Ok(ClusterCreated {
        cluster_id,
        unique_id,
        secret,
    })
}

pub async fn update_cluster(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
    name: &str,
) -> ApiResult<()> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    validation::validate_required_str("name", name, state.limits.max_field_len)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    require_updated(clusters::update_cluster_name(&mut tx, cluster_id, name.trim()).await?)?;
    propagation::notify_cluster_update(&mut tx, cluster_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn disable_cluster(state: &AppState, caller: &Caller, cluster_id: i64) -> ApiResult<()> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    // The DNS task reads the binding, so queue it while the row is enabled.
    ensure_cluster(&mut tx, cluster_id).await?;
    propagation::notify_cluster_dns_update(&mut tx, cluster_id).await?;
    require_updated(clusters::disable_cluster(&mut tx, cluster_id).await?)?;
    propagation::notify_cluster_update(&mut tx, cluster_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    info!(cluster_id, "cluster disabled");
    Ok(())
}

pub async fn update_cluster_health_check(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
    health_check: HealthCheckConfig,
) -> ApiResult<()> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    require_updated(clusters::update_health_check(&mut tx, cluster_id, &health_check).await?)?;
    propagation::notify_cluster_update(&mut tx, cluster_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn update_cluster_toa(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
    toa: ToaConfig,
) -> ApiResult<()> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    if toa.min_queue_id > toa.max_queue_id {
        return Err(crate::error::AppError::bad_request(
            "min_queue_id must not exceed max_queue_id",
        ));
    }
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    require_updated(clusters::update_toa(&mut tx, cluster_id, &toa).await?)?;
    propagation::notify_cluster_update(&mut tx, cluster_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn update_cluster_cache_policy(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
    cache_policy_id: i64,
) -> ApiResult<()> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    require_updated(
        clusters::update_cache_policy(&mut tx, cluster_id, cache_policy_id.max(0)).await?,
    )?;
    propagation::notify_cluster_update(&mut tx, cluster_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn update_cluster_firewall_policy(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
    http_firewall_policy_id: i64,
) -> ApiResult<()> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    require_updated(
        clusters::update_firewall_policy(&mut tx, cluster_id, http_firewall_policy_id.max(0))
            .await?,
    )?;
    propagation::notify_cluster_update(&mut tx, cluster_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn update_cluster_system_service(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
    service_type: &str,
    params: serde_json::Value,
) -> ApiResult<()> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    validation::validate_required_str("service_type", service_type, state.limits.max_field_len)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    require_updated(
        clusters::update_system_service(&mut tx, cluster_id, service_type.trim(), params).await?,
    )?;
    propagation::notify_cluster_update(&mut tx, cluster_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

/// Rebind the cluster to a DNS domain. Alias names of every server change
/// with the binding, so all of them are recomposed.
pub async fn update_cluster_dns(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
    req: UpdateClusterDnsRequest,
) -> ApiResult<usize> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    let dns_name = req.dns_name.trim().to_ascii_lowercase();
    if !dns_name.is_empty() {
        validation::validate_required_str("dns_name", &dns_name, state.limits.max_field_len)?;
    }

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    if req.dns_domain_id > 0 && dns_domains::get_enabled_domain(&mut tx, req.dns_domain_id)
        .await?
        .is_none()
    {
        return Err(not_found("dns domain").into());
    }
    let dns = ClusterDnsConfig {
        nodes_auto_sync: req.nodes_auto_sync,
        servers_auto_sync: req.servers_auto_sync,
    };
    require_updated(
        clusters::update_dns(&mut tx, cluster_id, req.dns_domain_id.max(0), &dns_name, &dns)
            .await?,
    )?;

    let changed = propagation::renew_cluster_servers(&mut tx, cluster_id).await?;
    propagation::notify_cluster_update(&mut tx, cluster_id).await?;
    propagation::notify_cluster_dns_update(&mut tx, cluster_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    info!(cluster_id, changed, "cluster dns updated");
    Ok(changed)
}

pub async fn find_cluster_dns(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
) -> ApiResult<ClusterDnsView> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let info = clusters::find_cluster_dns(&mut conn, cluster_id)
        .await?
        .ok_or_else(|| not_found("cluster"))?;
    let dns = info.dns.map(|d| d.0).unwrap_or_default();
    let mut dns_domain_name = String::new();
    if info.dns_domain_id > 0 {
        if let Some(domain) = dns_domains::get_enabled_domain(&mut conn, info.dns_domain_id).await?
        {
            dns_domain_name = domain.name;
        }
    }
    Ok(ClusterDnsView {
        cluster_id: info.id,
        dns_domain_id: info.dns_domain_id,
        dns_domain_name,
        dns_name: info.dns_name,
        nodes_auto_sync: dns.nodes_auto_sync,
        servers_auto_sync: dns.servers_auto_sync,
    })
}

/// Move a user and every server they own to another cluster. Moved
/// servers are recomposed against the new cluster.
pub async fn update_user_servers_cluster(
    state: &AppState,
    caller: &Caller,
    user_id: i64,
    cluster_id: i64,
) -> ApiResult<u64> {
    caller.require_admin()?;
    require_id(user_id, "user")?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    ensure_cluster(&mut tx, cluster_id).await?;
    let user = users::get_enabled_user(&mut tx, user_id)
        .await?
        .ok_or_else(|| not_found("user"))?;

    let server_ids = servers::list_enabled_server_ids_with_user(&mut tx, user_id).await?;
    // Records leave the old zone before the rows point elsewhere.
    for server_id in &server_ids {
        if servers::find_server_cluster_id(&mut tx, *server_id).await? != cluster_id {
            propagation::notify_dns_update(&mut tx, *server_id).await?;
        }
    }

    users::update_user_cluster_id(&mut tx, user_id, cluster_id).await?;
    let moved = servers::update_user_servers_cluster(&mut tx, user_id, cluster_id).await?;
    for server_id in &server_ids {
        propagation::notify_update(&mut tx, *server_id).await?;
        propagation::notify_dns_update(&mut tx, *server_id).await?;
    }

    let mut touched = vec![cluster_id];
    if user.cluster_id > 0 && user.cluster_id != cluster_id {
        touched.push(user.cluster_id);
    }
    for id in touched {
        node_tasks::create_cluster_task(&mut tx, id, NodeTaskType::ConfigChanged).await?;
        node_tasks::create_cluster_task(&mut tx, id, NodeTaskType::IpItemChanged).await?;
    }
    tx.commit().await.map_err(anyhow::Error::from)?;

    info!(user_id, cluster_id, moved, "user servers moved");
    Ok(moved)
}
