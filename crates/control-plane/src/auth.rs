use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, Request},
    middleware::Next,
};

use crate::{
    app_state::AppState,
    error::{ApiResult, AppError},
    persistence::{clusters, nodes},
    telemetry,
    tokens::verify_token,
};
use tracing::warn;

pub const CLUSTER_ID_HEADER: &str = "x-cluster-id";
pub const NODE_ID_HEADER: &str = "x-node-id";

/// Authenticated caller attached to request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Admin { id: i64 },
    User { id: i64 },
    /// An edge node; `node_id` is zero when the node did not identify itself.
    Node { cluster_id: i64, node_id: i64 },
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin { .. })
    }

    pub fn admin_id(&self) -> i64 {
        match self {
            Caller::Admin { id } => *id,
            _ => 0,
        }
    }

    pub fn user_id(&self) -> i64 {
        match self {
            Caller::User { id } => *id,
            _ => 0,
        }
    }

    pub fn require_admin(&self) -> crate::Result<i64> {
        match self {
            Caller::Admin { id } => Ok(*id),
            _ => Err(crate::error::permission_denied("admin access required")),
        }
    }

    /// Stable name used as the task-cursor consumer key.
    pub fn consumer_key(&self) -> String {
        match self {
            Caller::Admin { id } => format!("admin:{id}"),
            Caller::User { id } => format!("user:{id}"),
            Caller::Node {
                cluster_id,
                node_id,
            } => format!("node:{cluster_id}:{node_id}"),
        }
    }
}

/// Admin/user bearer-token middleware.
pub async fn require_caller(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> ApiResult<axum::response::Response> {
    let request_id = telemetry::request_id_from_request(&req);
    let path = format!("{} {}", req.method(), req.uri().path());
    let token = match extract_bearer_from_header(
        req.headers(),
        &state.caller_auth.header_name,
        "authorization header",
    ) {
        Ok(token) => token,
        Err(err) => {
            log_auth_failure(request_id.as_deref(), &path, &err.message);
            return Err(err);
        }
    };

    let caller = match (state.caller_token_validator)(&state, &token)
        .await
        .map_err(AppError::from)?
    {
        Some(caller) => caller,
        None => {
            log_auth_failure(request_id.as_deref(), &path, "invalid token");
            return Err(AppError::forbidden("invalid token"));
        }
    };

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

pub async fn static_token_validator(
    state: &AppState,
    token: &str,
) -> crate::Result<Option<Caller>> {
    Ok(state.caller_auth.resolve(token))
}

/// Edge-node middleware: `x-cluster-id` carries the cluster unique id and the
/// bearer token carries the cluster secret. `x-node-id` optionally narrows the
/// caller to one node of that cluster.
pub async fn require_node(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> ApiResult<axum::response::Response> {
    let request_id = telemetry::request_id_from_request(&req);
    let path = format!("{} {}", req.method(), req.uri().path());
    let caller = match authenticate_node(&state, req.headers()).await {
        Ok(caller) => caller,
        Err(err) => {
            log_auth_failure(request_id.as_deref(), &path, &err.message);
            return Err(err);
        }
    };
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

async fn authenticate_node(state: &AppState, headers: &HeaderMap) -> ApiResult<Caller> {
    let secret = extract_bearer_from_header(
        headers,
        &state.caller_auth.header_name,
        "authorization header",
    )?;
    let unique_id = header_str(headers, CLUSTER_ID_HEADER)?
        .ok_or_else(|| AppError::unauthorized(format!("missing {CLUSTER_ID_HEADER} header")))?;
    let node_id = match header_str(headers, NODE_ID_HEADER)? {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::bad_request(format!("invalid {NODE_ID_HEADER} header")))?,
        None => 0,
    };

    let mut conn = state.db.acquire().await.map_err(anyhow::Error::from)?;
    let cluster = clusters::find_enabled_cluster_by_unique_id(&mut conn, unique_id)
        .await?
        .ok_or_else(|| AppError::forbidden("invalid cluster credentials"))?;

    let secret_hash = cluster.secret_hash.clone();
    let pepper = state.token_pepper.clone();
    let verified =
        tokio::task::spawn_blocking(move || verify_token(&secret, &secret_hash, &pepper))
            .await
            .map_err(|err| anyhow::anyhow!("token verification task failed: {err}"))?;
    if !verified {
        return Err(AppError::forbidden("invalid cluster credentials"));
    }

    if node_id > 0 {
        let node = nodes::get_enabled_node(&mut conn, node_id)
            .await?
            .ok_or_else(|| AppError::forbidden("unknown node"))?;
        if node.cluster_id != cluster.id {
            return Err(AppError::forbidden("node does not belong to cluster"));
        }
    }

    Ok(Caller::Node {
        cluster_id: cluster.id,
        node_id,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| AppError::bad_request(format!("invalid {name} header"))),
        None => Ok(None),
    }
}

pub fn extract_bearer_from_header(
    headers: &HeaderMap,
    header: &HeaderName,
    context: &str,
) -> ApiResult<String> {
    let value = headers
        .get(header)
        .ok_or_else(|| AppError::unauthorized(format!("missing {context}")))?;

    let value = value
        .to_str()
        .map_err(|_| AppError::unauthorized(format!("invalid {context}")))?;

    let prefix = "Bearer ";
    if !value.starts_with(prefix) {
        return Err(AppError::unauthorized(format!("invalid {context} scheme")));
    }

    Ok(value[prefix.len()..].to_string())
}

fn log_auth_failure(request_id: Option<&str>, path: &str, reason: &str) {
    warn!(request_id, path, reason, "authentication failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderValue};

    #[test]
    fn bearer_extraction_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            extract_bearer_from_header(&headers, &AUTHORIZATION, "authorization header")
                .expect_err("missing")
                .message,
            "missing authorization header"
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_from_header(&headers, &AUTHORIZATION, "auth").is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(
            extract_bearer_from_header(&headers, &AUTHORIZATION, "auth").expect("token"),
            "abc"
        );
    }

    #[test]
    fn caller_helpers_split_roles() {
        let admin = Caller::Admin { id: 3 };
        assert!(admin.is_admin());
        assert_eq!(admin.require_admin().expect("admin"), 3);
        assert_eq!(admin.user_id(), 0);

        let user = Caller::User { id: 9 };
        assert!(user.require_admin().is_err());
        assert_eq!(user.user_id(), 9);

        let node = Caller::Node {
            cluster_id: 2,
            node_id: 5,
        };
        assert_eq!(node.consumer_key(), "node:2:5");
    }
}
