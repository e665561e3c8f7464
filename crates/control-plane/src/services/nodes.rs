use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    app_state::AppState,
    auth::Caller,
    error::{not_found, require_id, ApiResult},
    persistence::{
        clusters,
        ip_addresses::{self, IpAddressRecord, NewIpAddress, DEFAULT_ROLE},
        nodes::{self, NodeRecord},
        Conn,
    },
    propagation, validation,
};

#[derive(Debug, Clone, Deserialize)]
pub struct NodeRequest {
    pub cluster_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeCreated {
    pub node_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAddressRequest {
    pub node_id: i64,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub name: String,
    pub ip: String,
    #[serde(default = "default_can_access")]
    pub can_access: bool,
}

fn default_can_access() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAddressRequest {
    #[serde(default)]
    pub name: String,
    pub ip: String,
    #[serde(default = "default_can_access")]
    pub can_access: bool,
}

fn role_or_default(role: Option<&str>) -> &str {
    match role.map(str::trim) {
        Some(role) if !role.is_empty() => role,
        _ => DEFAULT_ROLE,
    }
}

async fn ensure_cluster(conn: &mut Conn, cluster_id: i64) -> crate::Result<()> {
    require_id(cluster_id, "cluster")?;
    if !clusters::exists_enabled_cluster(conn, cluster_id).await? {
        return Err(not_found("cluster"));
    }
    Ok(())
}

async fn enabled_node(conn: &mut Conn, node_id: i64) -> crate::Result<NodeRecord> {
    require_id(node_id, "node")?;
    nodes::get_enabled_node(conn, node_id)
        .await?
        .ok_or_else(|| not_found("node"))
}

async fn enabled_address(conn: &mut Conn, address_id: i64) -> crate::Result<IpAddressRecord> {
    require_id(address_id, "ip address")?;
    ip_addresses::get_enabled_address(conn, address_id)
        .await?
        .ok_or_else(|| not_found("ip address"))
}

pub async fn create_node(
    state: &AppState,
    caller: &Caller,
    req: NodeRequest,
) -> ApiResult<NodeCreated> {
    caller.require_admin()?;
    validation::validate_required_str("name", &req.name, state.limits.max_field_len)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    ensure_cluster(&mut tx, req.cluster_id).await?;
    let node_id = nodes::create_node(&mut tx, req.cluster_id, req.name.trim()).await?;
    propagation::notify_cluster_update(&mut tx, req.cluster_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    info!(node_id, cluster_id = req.cluster_id, "node created");
    Ok(NodeCreated { node_id })
}

/// Rename a node or move it to another cluster.
pub async fn update_node(
    state: &AppState,
    caller: &Caller,
    node_id: i64,
    req: NodeRequest,
) -> ApiResult<()> {
    caller.require_admin()?;
    validation::validate_required_str("name", &req.name, state.limits.max_field_len)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let node = enabled_node(&mut tx, node_id).await?;
    ensure_cluster(&mut tx, req.cluster_id).await?;

    // Records in the old cluster's zone go away before the move.
    let moved = node.cluster_id != req.cluster_id;
    if moved {
        propagation::notify_node_dns_update(&mut tx, node_id).await?;
    }
    nodes::update_node(&mut tx, node_id, req.name.trim(), req.cluster_id).await?;

    if moved && node.cluster_id > 0 {
        propagation::notify_cluster_update(&mut tx, node.cluster_id).await?;
    }
    propagation::notify_cluster_update(&mut tx, req.cluster_id).await?;
    propagation::notify_node_dns_update(&mut tx, node_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn disable_node(state: &AppState, caller: &Caller, node_id: i64) -> ApiResult<()> {
    caller.require_admin()?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let node = enabled_node(&mut tx, node_id).await?;
    nodes::disable_node(&mut tx, node_id).await?;
    if node.cluster_id > 0 {
        propagation::notify_cluster_update(&mut tx, node.cluster_id).await?;
    }
    propagation::notify_node_dns_update(&mut tx, node_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    info!(node_id, "node disabled");
    Ok(())
}

pub async fn list_cluster_nodes(
    state: &AppState,
    caller: &Caller,
    cluster_id: i64,
) -> ApiResult<Vec<NodeRecord>> {
    caller.require_admin()?;
    require_id(cluster_id, "cluster")?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(nodes::list_enabled_nodes_with_cluster(&mut conn, cluster_id).await?)
}

pub async fn create_address(
    state: &AppState,
    caller: &Caller,
    req: CreateAddressRequest,
) -> ApiResult<i64> {
    caller.require_admin()?;
    let ip = validation::normalize_ip("ip", &req.ip)?;
    validation::validate_opt_str(
        "name",
        Some(req.name.as_str()).filter(|n| !n.is_empty()),
        state.limits.max_field_len,
    )?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    enabled_node(&mut tx, req.node_id).await?;
    let address_id = ip_addresses::create_address(
        &mut tx,
        NewIpAddress {
            node_id: req.node_id,
            role: role_or_default(Some(&req.role)).to_string(),
            name: req.name,
            ip,
            can_access: req.can_access,
        },
    )
    .await?;
    propagation::notify_node_dns_update(&mut tx, req.node_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(address_id)
}

pub async fn update_address(
    state: &AppState,
    caller: &Caller,
    address_id: i64,
    req: UpdateAddressRequest,
) -> ApiResult<()> {
    caller.require_admin()?;
    let ip = validation::normalize_ip("ip", &req.ip)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let address = enabled_address(&mut tx, address_id).await?;
    ip_addresses::update_address(&mut tx, address_id, &req.name, &ip, req.can_access).await?;
    propagation::notify_node_dns_update(&mut tx, address.node_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn update_address_ip(
    state: &AppState,
    caller: &Caller,
    address_id: i64,
    ip: &str,
) -> ApiResult<()> {
    caller.require_admin()?;
    let ip = validation::normalize_ip("ip", ip)?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let address = enabled_address(&mut tx, address_id).await?;
    ip_addresses::update_address_ip(&mut tx, address_id, &ip).await?;
    propagation::notify_node_dns_update(&mut tx, address.node_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

/// Reassign an address, re-enabling it if it was disabled.
pub async fn update_address_node(
    state: &AppState,
    caller: &Caller,
    address_id: i64,
    node_id: i64,
) -> ApiResult<()> {
    caller.require_admin()?;
    require_id(address_id, "ip address")?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    enabled_node(&mut tx, node_id).await?;
    let old_node_id = ip_addresses::find_address_node_id(&mut tx, address_id).await?;
    if old_node_id == 0 {
        return Err(not_found("ip address").into());
    }
    ip_addresses::update_address_node(&mut tx, address_id, node_id).await?;
    if old_node_id != node_id {
        propagation::notify_node_dns_update(&mut tx, old_node_id).await?;
    }
    propagation::notify_node_dns_update(&mut tx, node_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn disable_address(state: &AppState, caller: &Caller, address_id: i64) -> ApiResult<()> {
    caller.require_admin()?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let address = enabled_address(&mut tx, address_id).await?;
    ip_addresses::disable_address(&mut tx, address_id).await?;
    propagation::notify_node_dns_update(&mut tx, address.node_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

pub async fn disable_all_addresses_with_node(
    state: &AppState,
    caller: &Caller,
    node_id: i64,
    role: Option<&str>,
) -> ApiResult<u64> {
    caller.require_admin()?;
    require_id(node_id, "node")?;
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let disabled =
        ip_addresses::disable_all_with_node(&mut tx, node_id, role_or_default(role)).await?;
    propagation::notify_node_dns_update(&mut tx, node_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    Ok(disabled)
}

pub async fn list_enabled_addresses(
    state: &AppState,
    caller: &Caller,
    node_id: i64,
    role: Option<&str>,
) -> ApiResult<Vec<IpAddressRecord>> {
    caller.require_admin()?;
    require_id(node_id, "node")?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(ip_addresses::list_enabled_with_node(&mut conn, node_id, role_or_default(role)).await?)
}

pub async fn find_first_access_ip(
    state: &AppState,
    caller: &Caller,
    node_id: i64,
    role: Option<&str>,
) -> ApiResult<Option<String>> {
    caller.require_admin()?;
    require_id(node_id, "node")?;
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(ip_addresses::find_first_access_ip(&mut conn, node_id, role_or_default(role)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        persistence::{dns_domains, dns_tasks, node_tasks},
        services::test_support::{seed_cluster, setup_state},
    };
    use axum::http::StatusCode;
    use common::config::ClusterDnsConfig;

    const ADMIN: Caller = Caller::Admin { id: 1 };

    async fn bound_cluster(conn: &mut Conn, name: &str) -> i64 {
        let cluster_id = seed_cluster(conn, name).await;
        let domain_id = dns_domains::create_domain(conn, "example.net")
            .await
            .expect("domain");
        clusters::update_dns(conn, cluster_id, domain_id, name, &ClusterDnsConfig::default())
            .await
            .expect("bind");
        cluster_id
    }

    #[tokio::test]
    async fn address_changes_notify_dns_only_when_bound() {
        let state = setup_state().await;
        let (plain, bound) = {
            let mut conn = state.db.acquire().await.expect("conn");
            (
                seed_cluster(&mut conn, "plain").await,
                bound_cluster(&mut conn, "bound").await,
            )
        };
        let plain_node = create_node(
            &state,
            &ADMIN,
            NodeRequest {
                cluster_id: plain,
                name: "p1".into(),
            },
        )
        .await
        .expect("plain node")
        .node_id;
        let bound_node = create_node(
            &state,
            &ADMIN,
            NodeRequest {
                cluster_id: bound,
                name: "b1".into(),
            },
        )
        .await
        .expect("bound node")
        .node_id;

        for node_id in [plain_node, bound_node] {
            create_address(
                &state,
                &ADMIN,
                CreateAddressRequest {
                    node_id,
                    role: String::new(),
                    name: String::new(),
                    ip: " 10.0.0.1 ".into(),
                    can_access: true,
                },
            )
            .await
            .expect("address");
        }

        let mut conn = state.db.acquire().await.expect("conn");
        assert_eq!(dns_tasks::count_dns_tasks(&mut conn).await.expect("dns"), 1);
        assert_eq!(
            node_tasks::count_cluster_tasks(&mut conn, plain)
                .await
                .expect("tasks"),
            1
        );
        drop(conn);

        let ip = find_first_access_ip(&state, &ADMIN, bound_node, None)
            .await
            .expect("ip");
        assert_eq!(ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn moving_a_node_touches_both_clusters() {
        let state = setup_state().await;
        let (from, to) = {
            let mut conn = state.db.acquire().await.expect("conn");
            (
                bound_cluster(&mut conn, "from").await,
                seed_cluster(&mut conn, "to").await,
            )
        };
        let node_id = create_node(
            &state,
            &ADMIN,
            NodeRequest {
                cluster_id: from,
                name: "n1".into(),
            },
        )
        .await
        .expect("node")
        .node_id;

        update_node(
            &state,
            &ADMIN,
            node_id,
            NodeRequest {
                cluster_id: to,
                name: "n1".into(),
            },
        )
        .await
        .expect("move");

        let mut conn = state.db.acquire().await.expect("conn");
        assert_eq!(
            node_tasks::count_cluster_tasks(&mut conn, from)
                .await
                .expect("from"),
            2
        );
        assert_eq!(
            node_tasks::count_cluster_tasks(&mut conn, to)
                .await
                .expect("to"),
            1
        );
        // Only the old, bound cluster produces a DNS task.
        assert_eq!(dns_tasks::count_dns_tasks(&mut conn).await.expect("dns"), 1);
    }

    #[tokio::test]
    async fn reassigning_an_address_re_enables_it() {
        let state = setup_state().await;
        let cluster_id = {
            let mut conn = state.db.acquire().await.expect("conn");
            seed_cluster(&mut conn, "edge").await
        };
        let mut node_ids = Vec::new();
        for name in ["a", "b"] {
            node_ids.push(
                create_node(
                    &state,
                    &ADMIN,
                    NodeRequest {
                        cluster_id,
                        name: name.into(),
                    },
                )
                .await
                .expect("node")
                .node_id,
            );
        }
        let address_id = create_address(
            &state,
            &ADMIN,
            CreateAddressRequest {
                node_id: node_ids[0],
                role: String::new(),
                name: "main".into(),
                ip: "192.0.2.1".into(),
                can_access: false,
            },
        )
        .await
        .expect("address");
        disable_address(&state, &ADMIN, address_id)
            .await
            .expect("disable");

        update_address_node(&state, &ADMIN, address_id, node_ids[1])
            .await
            .expect("move");
        let listed = list_enabled_addresses(&state, &ADMIN, node_ids[1], Some("node"))
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, address_id);

        let err = update_address_ip(&state, &ADMIN, address_id, "not-an-ip")
            .await
            .expect_err("invalid ip");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
