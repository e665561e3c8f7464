#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderName, Request as HttpRequest, StatusCode},
    Router,
};
use control_plane::{
    app_state::{AppState, CallerAuth},
    config::{LimitsConfig, MessagingConfig, StaticToken},
    http::{build_metrics_router, build_router},
    metrics::{init_metrics_recorder, record_build_info},
    persistence as db,
    persistence::migrations,
    stats::StatsAggregator,
    tokens::RandomHex,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";
pub const TEST_USER_TOKEN: &str = "test-user-token";
pub const TEST_USER_ID: i64 = 7;

pub struct TestApp {
    pub app: Router,
    pub metrics_app: Router,
    pub state: AppState,
}

pub async fn setup_app() -> TestApp {
    setup_app_with_limits(LimitsConfig::default()).await
}

pub async fn setup_app_with_limits(limits: LimitsConfig) -> TestApp {
    let db = migrations::init_pool("sqlite::memory:")
        .await
        .expect("db init");
    let migration_outcome = migrations::run_migrations(&db).await.expect("migrations");
    let state = make_state(db, limits, migration_outcome.snapshot);
    let app = build_router(state.clone()).with_state(state.clone());
    let metrics_app = build_metrics_router().with_state(state.clone());
    TestApp {
        app,
        metrics_app,
        state,
    }
}

pub fn make_state(db: db::Db, limits: LimitsConfig, schema: db::MigrationSnapshot) -> AppState {
    let metrics_handle = init_metrics_recorder();
    record_build_info(&schema);

    AppState {
        db,
        caller_auth: CallerAuth {
            admin_tokens: vec![StaticToken {
                id: 1,
                token: TEST_ADMIN_TOKEN.into(),
            }],
            user_tokens: vec![StaticToken {
                id: TEST_USER_ID,
                token: TEST_USER_TOKEN.into(),
            }],
            header_name: HeaderName::from_static("authorization"),
        },
        caller_token_validator: Arc::new(|state, token| {
            Box::pin(control_plane::auth::static_token_validator(state, token))
        }),
        token_pepper: "test-pepper".into(),
        limits,
        messaging: MessagingConfig::default(),
        stats: Arc::new(StatsAggregator::new()),
        unique_values: Arc::new(RandomHex),
        metrics_handle,
        schema,
    }
}

/// Credentials an edge node presents.
#[derive(Debug, Clone)]
pub struct NodeCredentials {
    pub unique_id: String,
    pub secret: String,
    pub node_id: Option<i64>,
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> HttpRequest<Body> {
    let mut builder = HttpRequest::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn node_request(
    method: &str,
    uri: &str,
    creds: &NodeCredentials,
    body: Option<Value>,
) -> HttpRequest<Body> {
    let mut builder = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", creds.secret))
        .header("x-cluster-id", creds.unique_id.as_str());
    if let Some(node_id) = creds.node_id {
        builder = builder.header("x-node-id", node_id.to_string());
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &Router, req: HttpRequest<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

pub async fn admin(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send(app, json_request(method, uri, Some(TEST_ADMIN_TOKEN), body)).await
}

/// Create a cluster through the API and return its id and node credentials.
pub async fn create_cluster(app: &Router, name: &str) -> (i64, NodeCredentials) {
    let (status, body) = admin(
        app,
        "POST",
        "/api/v1/clusters",
        Some(serde_json::json!({ "name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create cluster: {body}");
    (
        body["cluster_id"].as_i64().expect("cluster id"),
        NodeCredentials {
            unique_id: body["unique_id"].as_str().expect("unique id").to_string(),
            secret: body["secret"].as_str().expect("secret").to_string(),
            node_id: None,
        },
    )
}

pub async fn create_server(app: &Router, cluster_id: i64, host: &str) -> i64 {
    let (status, body) = admin(
        app,
        "POST",
        "/api/v1/servers",
        Some(serde_json::json!({
            "type": "httpProxy",
            "name": host,
            "cluster_id": cluster_id,
            "server_names": [{ "name": host }],
            "http": { "isOn": true, "listen": [{ "protocol": "http", "portRange": "80" }] },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create server: {body}");
    body["server_id"].as_i64().expect("server id")
}
