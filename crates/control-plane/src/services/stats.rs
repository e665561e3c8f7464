use chrono::Utc;
use common::api::HttpRequestStatUpload;
use serde::Deserialize;

use crate::{
    app_state::AppState,
    auth::Caller,
    error::{invalid_argument, permission_denied, ApiResult},
    persistence::stats::{self, HttpStatRow},
    services::server_for_caller,
    stats::{KIND_BROWSER, KIND_CITY, KIND_FIREWALL, KIND_PROVIDER, KIND_SYSTEM},
};

#[derive(Debug, Clone, Deserialize)]
pub struct ListStatsRequest {
    pub kind: String,
    /// `YYYYMM` for month buckets, `YYYYMMDD` for firewall groups.
    pub period: String,
}

/// Fold a node upload into the in-memory counters. Rows reach storage on
/// the next flush.
pub async fn upload_http_request_stats(
    state: &AppState,
    caller: &Caller,
    upload: HttpRequestStatUpload,
) -> ApiResult<()> {
    if !matches!(caller, Caller::Node { .. }) {
        return Err(permission_denied("only nodes upload statistics").into());
    }
    state.stats.add_upload(&upload, Utc::now().date_naive())?;
    Ok(())
}

pub async fn list_server_stats(
    state: &AppState,
    caller: &Caller,
    server_id: i64,
    req: &ListStatsRequest,
) -> ApiResult<Vec<HttpStatRow>> {
    let kind = match req.kind.as_str() {
        KIND_CITY | KIND_PROVIDER | KIND_SYSTEM | KIND_BROWSER | KIND_FIREWALL => req.kind.as_str(),
        other => return Err(invalid_argument(format!("unknown stat kind: {other}")).into()),
    };
    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    server_for_caller(&mut conn, caller, server_id).await?;
    Ok(stats::list_server_stats(&mut conn, kind, server_id, req.period.trim()).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::test_support::{seed_cluster, seed_server, setup_state},
        tasks::stats_flush::run_stats_flush,
    };
    use axum::http::StatusCode;
    use common::api::VersionedStat;

    #[tokio::test]
    async fn uploads_become_visible_after_a_flush() {
        let state = setup_state().await;
        let server_id = {
            let mut conn = state.db.acquire().await.expect("conn");
            let cluster_id = seed_cluster(&mut conn, "edge").await;
            seed_server(&mut conn, cluster_id, 7, "abcd0001").await
        };
        let node = Caller::Node {
            cluster_id: 1,
            node_id: 0,
        };
        let upload = HttpRequestStatUpload {
            month: "202603".into(),
            browsers: vec![VersionedStat {
                server_id,
                name: "Firefox".into(),
                version: "120".into(),
                count: 4,
            }],
            ..HttpRequestStatUpload::default()
        };
        upload_http_request_stats(&state, &node, upload.clone())
            .await
            .expect("first");
        upload_http_request_stats(&state, &node, upload)
            .await
            .expect("second");
        run_stats_flush(&state.db, &state.stats)
            .await
            .expect("flush");

        let rows = list_server_stats(
            &state,
            &Caller::User { id: 7 },
            server_id,
            &ListStatsRequest {
                kind: KIND_BROWSER.into(),
                period: "202603".into(),
            },
        )
        .await
        .expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 8);

        let err = upload_http_request_stats(
            &state,
            &Caller::Admin { id: 1 },
            HttpRequestStatUpload::default(),
        )
        .await
        .expect_err("admin upload");
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }
}
