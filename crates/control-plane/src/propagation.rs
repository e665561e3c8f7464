//! Config change propagation: the change gate plus the node and DNS task
//! notifications every mutating service runs before committing.
//!
//! All functions take the caller's transaction so that the entity update,
//! the recomposed config, the hash and the enqueued tasks commit together.

use std::collections::BTreeSet;

use common::api::{DnsTaskType, NodeTaskType, TaskScope};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{
    composer,
    error::{invalid_argument, is_not_found, not_found, require_id},
    metrics,
    persistence::{
        clusters,
        dns_tasks::{self, NewDnsTask},
        node_tasks, nodes, servers,
        settings::{self, SERVER_GLOBAL_CONFIG},
        Conn,
    },
    tokens::{UniqueValueSource, CLUSTER_UNIQUE_ID_LEN, MAX_UNIQUE_ATTEMPTS, SERVER_DNS_NAME_LEN},
    Result,
};

/// Hex SHA-256 over the composed config followed by the global settings.
pub fn config_hash(config: &[u8], global: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config);
    hasher.update(global);
    format!("{:x}", hasher.finalize())
}

/// Store `config` when its hash differs from the stored one and bump the
/// version. Returns whether anything was written.
pub async fn update_server_config(
    conn: &mut Conn,
    server_id: i64,
    config: &[u8],
    persist_hash: bool,
) -> Result<bool> {
    require_id(server_id, "server")?;
    let state = servers::find_server_config_state(conn, server_id)
        .await?
        .ok_or_else(|| not_found("server"))?;

    let global = settings::read_setting(conn, SERVER_GLOBAL_CONFIG).await?;
    let hash = config_hash(config, &global);
    if state.config_hash == hash {
        metrics::record_config_change(false);
        debug!(server_id, version = state.version, "server config unchanged");
        return Ok(false);
    }

    let config_json = std::str::from_utf8(config)
        .map_err(|err| invalid_argument(format!("server config is not utf-8: {err}")))?;
    let version = servers::write_server_config(
        conn,
        server_id,
        config_json,
        persist_hash.then_some(hash.as_str()),
    )
    .await?
    .ok_or_else(|| not_found("server"))?;

    metrics::record_config_change(true);
    info!(server_id, version, "server config changed");
    Ok(true)
}

/// Recompose a server and pass the result through the change gate.
pub async fn renew_server_config(conn: &mut Conn, server_id: i64) -> Result<bool> {
    let config = composer::compose_server_config(conn, server_id).await?;
    let encoded = composer::encode_server_config(&config)?;
    update_server_config(conn, server_id, &encoded, true).await
}

/// Recompose a server and, when its config changed or vanished, queue a
/// config task for the nodes of its cluster.
pub async fn notify_update(conn: &mut Conn, server_id: i64) -> Result<bool> {
    require_id(server_id, "server")?;
    let changed = match renew_server_config(conn, server_id).await {
        Ok(changed) => changed,
        Err(err) if is_not_found(&err) => true,
        Err(err) => return Err(err),
    };
    if !changed {
        return Ok(false);
    }

    let cluster_id = servers::find_server_cluster_id(conn, server_id).await?;
    if cluster_id <= 0 {
        return Ok(false);
    }
    node_tasks::create_server_task(conn, cluster_id, server_id, NodeTaskType::ConfigChanged)
        .await?;
    Ok(true)
}

/// Recompose every enabled server of a cluster. Returns how many changed.
pub async fn renew_cluster_servers(conn: &mut Conn, cluster_id: i64) -> Result<usize> {
    let server_ids = servers::list_enabled_server_ids_with_cluster(conn, cluster_id).await?;
    let mut changed = 0;
    for server_id in server_ids {
        if renew_server_config(conn, server_id).await? {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Recompose every enabled server. Returns the clusters that own a changed
/// server.
pub async fn renew_all_servers(conn: &mut Conn) -> Result<BTreeSet<i64>> {
    let server_ids = servers::list_enabled_server_ids(conn).await?;
    let mut clusters = BTreeSet::new();
    for server_id in server_ids {
        if renew_server_config(conn, server_id).await? {
            let cluster_id = servers::find_server_cluster_id(conn, server_id).await?;
            if cluster_id > 0 {
                clusters.insert(cluster_id);
            }
        }
    }
    Ok(clusters)
}

/// Domain of a cluster with a usable DNS binding.
async fn bound_domain_id(conn: &mut Conn, cluster_id: i64) -> Result<Option<i64>> {
    if cluster_id <= 0 {
        return Ok(None);
    }
    let binding = clusters::find_cluster_dns(conn, cluster_id).await?;
    Ok(binding
        .filter(|binding| binding.is_bound())
        .map(|binding| binding.dns_domain_id))
}

/// Queue a DNS task for a server when its cluster is bound to a domain.
pub async fn notify_dns_update(conn: &mut Conn, server_id: i64) -> Result<bool> {
    require_id(server_id, "server")?;
    let cluster_id = servers::find_server_cluster_id(conn, server_id).await?;
    let Some(domain_id) = bound_domain_id(conn, cluster_id).await? else {
        debug!(server_id, cluster_id, "cluster has no dns binding");
        return Ok(false);
    };
    dns_tasks::create_dns_task(
        conn,
        NewDnsTask {
            cluster_id,
            domain_id,
            scope: TaskScope::Server,
            scope_id: server_id,
            task_type: DnsTaskType::ServerChange,
        },
    )
    .await?;
    Ok(true)
}

/// Queue a DNS task for a node when its cluster is bound to a domain.
pub async fn notify_node_dns_update(conn: &mut Conn, node_id: i64) -> Result<bool> {
    require_id(node_id, "node")?;
    let cluster_id = nodes::find_node_cluster_id(conn, node_id).await?;
    let Some(domain_id) = bound_domain_id(conn, cluster_id).await? else {
        return Ok(false);
    };
    dns_tasks::create_dns_task(
        conn,
        NewDnsTask {
            cluster_id,
            domain_id,
            scope: TaskScope::Node,
            scope_id: node_id,
            task_type: DnsTaskType::NodeChange,
        },
    )
    .await?;
    Ok(true)
}

/// Queue a cluster-wide DNS resync. Unlike the server and node variants this
/// is unconditional; the consumer resolves the binding itself.
pub async fn notify_cluster_dns_update(conn: &mut Conn, cluster_id: i64) -> Result<i64> {
    require_id(cluster_id, "cluster")?;
    let domain_id = clusters::find_cluster_dns(conn, cluster_id)
        .await?
        .map(|binding| binding.dns_domain_id)
        .unwrap_or_default();
    dns_tasks::create_dns_task(
        conn,
        NewDnsTask {
            cluster_id,
            domain_id,
            scope: TaskScope::Cluster,
            scope_id: cluster_id,
            task_type: DnsTaskType::ClusterChange,
        },
    )
    .await
}

/// Config task for every node of a cluster.
pub async fn notify_cluster_update(conn: &mut Conn, cluster_id: i64) -> Result<i64> {
    require_id(cluster_id, "cluster")?;
    node_tasks::create_cluster_task(conn, cluster_id, NodeTaskType::ConfigChanged).await
}

/// Fresh server DNS name not used by any server.
pub async fn generate_server_dns_name(
    conn: &mut Conn,
    source: &dyn UniqueValueSource,
) -> Result<String> {
    for _ in 0..MAX_UNIQUE_ATTEMPTS {
        let candidate = source.next_hex(SERVER_DNS_NAME_LEN);
        if !servers::exists_dns_name(conn, &candidate).await? {
            return Ok(candidate);
        }
        debug!(candidate, "server dns name taken, retrying");
    }
    Err(anyhow::anyhow!(
        "no unique server dns name after {MAX_UNIQUE_ATTEMPTS} attempts"
    ))
}

/// Fresh cluster unique id not used by any cluster.
pub async fn generate_cluster_unique_id(
    conn: &mut Conn,
    source: &dyn UniqueValueSource,
) -> Result<String> {
    for _ in 0..MAX_UNIQUE_ATTEMPTS {
        let candidate = source.next_hex(CLUSTER_UNIQUE_ID_LEN);
        if !clusters::exists_unique_id(conn, &candidate).await? {
            return Ok(candidate);
        }
        debug!(candidate, "cluster unique id taken, retrying");
    }
    Err(anyhow::anyhow!(
        "no unique cluster id after {MAX_UNIQUE_ATTEMPTS} attempts"
    ))
}
