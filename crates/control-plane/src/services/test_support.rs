use axum::http::HeaderName;
use std::sync::Arc;

use crate::{
    app_state::{AppState, CallerAuth},
    config::{LimitsConfig, MessagingConfig, StaticToken},
    persistence::{
        clusters::{self, NewCluster},
        servers::{self, NewServer},
        Conn,
    },
    stats::StatsAggregator,
    tokens::{RandomHex, UniqueValueSourceRef},
};
use common::config::ClusterDnsConfig;

pub(crate) async fn setup_state() -> AppState {
    setup_state_with(Arc::new(RandomHex)).await
}

pub(crate) async fn setup_state_with(unique_values: UniqueValueSourceRef) -> AppState {
    let db = crate::persistence::migrations::init_pool("sqlite::memory:")
        .await
        .expect("pool");
    let migration_outcome = crate::persistence::migrations::run_migrations(&db)
        .await
        .expect("migrations");
    let metrics_handle = crate::metrics::init_metrics_recorder();
    crate::metrics::record_build_info(&migration_outcome.snapshot);

    AppState {
        db,
        caller_auth: CallerAuth {
            admin_tokens: vec![StaticToken {
                id: 1,
                token: "admin-token".into(),
            }],
            user_tokens: vec![StaticToken {
                id: 7,
                token: "user-token".into(),
            }],
            header_name: HeaderName::from_static("authorization"),
        },
        caller_token_validator: Arc::new(|state, token| {
            Box::pin(crate::auth::static_token_validator(state, token))
        }),
        token_pepper: "pepper".into(),
        limits: LimitsConfig::default(),
        messaging: MessagingConfig::default(),
        stats: Arc::new(StatsAggregator::new()),
        unique_values,
        metrics_handle,
        schema: migration_outcome.snapshot,
    }
}

pub(crate) async fn seed_cluster(conn: &mut Conn, name: &str) -> i64 {
    clusters::create_cluster(
        conn,
        NewCluster {
            admin_id: 1,
            name: name.into(),
            unique_id: format!("{name:0>32}"),
            secret_hash: "hash".into(),
            dns: ClusterDnsConfig::default(),
        },
    )
    .await
    .expect("cluster")
}

pub(crate) async fn seed_server(conn: &mut Conn, cluster_id: i64, user_id: i64, dns: &str) -> i64 {
    servers::create_server(
        conn,
        NewServer {
            user_id,
            kind: "httpProxy".into(),
            name: format!("site-{dns}"),
            cluster_id,
            server_names_json: r#"[{"name":"example.com"}]"#.into(),
            dns_name: dns.into(),
            ..NewServer::default()
        },
    )
    .await
    .expect("server")
}
