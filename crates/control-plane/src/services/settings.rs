use common::config::GlobalServerConfig;
use serde_json::Value;
use tracing::info;

use crate::{
    app_state::AppState,
    auditing,
    auth::Caller,
    error::{invalid_argument, permission_denied, ApiResult},
    persistence::settings::{self, SERVER_GLOBAL_CONFIG},
    propagation,
};

pub async fn read_server_global_config(
    state: &AppState,
    caller: &Caller,
) -> ApiResult<GlobalServerConfig> {
    if let Caller::Node { .. } = caller {
        return Err(permission_denied("nodes cannot read platform settings").into());
    }
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    Ok(auditing::read_global_config(&mut conn).await?)
}

/// Store new global settings. Every server hash mixes them in, so all
/// servers are recomposed and each cluster owning a changed server is told.
pub async fn update_server_global_config(
    state: &AppState,
    caller: &Caller,
    value: Value,
) -> ApiResult<usize> {
    caller.require_admin()?;
    let parsed: GlobalServerConfig = serde_json::from_value(value)
        .map_err(|err| invalid_argument(format!("invalid server global config: {err}")))?;
    let raw = serde_json::to_vec(&parsed).map_err(anyhow::Error::from)?;

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    settings::update_setting(&mut tx, SERVER_GLOBAL_CONFIG, &raw).await?;
    let touched = propagation::renew_all_servers(&mut tx).await?;
    for cluster_id in &touched {
        propagation::notify_cluster_update(&mut tx, *cluster_id).await?;
    }
    tx.commit().await.map_err(anyhow::Error::from)?;

    info!(clusters = touched.len(), "server global config updated");
    Ok(touched.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        persistence::{node_tasks, servers},
        services::test_support::{seed_cluster, seed_server, setup_state},
    };
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn update_renews_servers_and_notifies_clusters() {
        let state = setup_state().await;
        let (cluster_id, server_id) = {
            let mut conn = state.db.acquire().await.expect("conn");
            let cluster_id = seed_cluster(&mut conn, "edge").await;
            let server_id = seed_server(&mut conn, cluster_id, 0, "abcd0001").await;
            propagation::renew_server_config(&mut conn, server_id)
                .await
                .expect("renew");
            (cluster_id, server_id)
        };

        let admin = Caller::Admin { id: 1 };
        let clusters = update_server_global_config(
            &state,
            &admin,
            json!({"httpAll": {"domainAuditingIsOn": true}}),
        )
        .await
        .expect("update");
        assert_eq!(clusters, 1);

        let global = read_server_global_config(&state, &admin)
            .await
            .expect("read");
        assert!(global.http_all.domain_auditing_is_on);

        let mut conn = state.db.acquire().await.expect("conn");
        let stored = servers::find_server_config_state(&mut conn, server_id)
            .await
            .expect("state")
            .expect("row");
        assert_eq!(stored.version, 3);
        assert_eq!(
            node_tasks::count_cluster_tasks(&mut conn, cluster_id)
                .await
                .expect("tasks"),
            1
        );
    }

    #[tokio::test]
    async fn only_admins_change_settings() {
        let state = setup_state().await;
        let err = update_server_global_config(&state, &Caller::User { id: 7 }, json!({}))
            .await
            .expect_err("user");
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let err = update_server_global_config(
            &state,
            &Caller::Admin { id: 1 },
            json!({"httpAll": {"domainAuditingIsOn": "yes"}}),
        )
        .await
        .expect_err("shape");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
