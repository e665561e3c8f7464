use std::{future::Future, pin::Pin, sync::Arc};

use crate::{
    auth::Caller,
    config::{LimitsConfig, MessagingConfig, StaticToken},
    persistence,
    stats::StatsAggregator,
    tokens::UniqueValueSourceRef,
};
use axum::http::HeaderName;
use metrics_exporter_prometheus::PrometheusHandle;
use subtle::ConstantTimeEq;

/// Shared application state passed into handlers and services.
#[derive(Clone)]
pub struct AppState {
    pub db: persistence::Db,
    pub caller_auth: CallerAuth,
    /// Pluggable validator for admin/user bearer tokens (static tokens by
    /// default).
    pub caller_token_validator: CallerTokenValidator,
    pub token_pepper: String,
    pub limits: LimitsConfig,
    pub messaging: MessagingConfig,
    pub stats: Arc<StatsAggregator>,
    /// Candidate generator for cluster unique ids and server DNS names.
    pub unique_values: UniqueValueSourceRef,
    pub metrics_handle: PrometheusHandle,
    pub schema: persistence::MigrationSnapshot,
}

/// Static bearer tokens for administrators and users.
#[derive(Clone)]
pub struct CallerAuth {
    pub admin_tokens: Vec<StaticToken>,
    pub user_tokens: Vec<StaticToken>,
    pub header_name: HeaderName,
}

impl CallerAuth {
    /// Resolve a presented token against the configured ones in constant time
    /// per candidate. Admin tokens win when a token is configured twice.
    pub fn resolve(&self, candidate: &str) -> Option<Caller> {
        let matches = |entry: &&StaticToken| {
            if entry.token.len() != candidate.len() {
                return false;
            }
            entry.token.as_bytes().ct_eq(candidate.as_bytes()).into()
        };
        if let Some(entry) = self.admin_tokens.iter().find(matches) {
            return Some(Caller::Admin { id: entry.id });
        }
        self.user_tokens
            .iter()
            .find(matches)
            .map(|entry| Caller::User { id: entry.id })
    }
}

/// Callback used to turn a bearer token into a caller.
pub type CallerTokenValidator = Arc<
    dyn for<'a> Fn(
            &'a AppState,
            &'a str,
        )
            -> Pin<Box<dyn Future<Output = crate::Result<Option<Caller>>> + Send + 'a>>
        + Send
        + Sync,
>;

#[allow(dead_code)]
fn _assert_app_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> CallerAuth {
        CallerAuth {
            admin_tokens: vec![StaticToken {
                id: 1,
                token: "admin-token".into(),
            }],
            user_tokens: vec![StaticToken {
                id: 42,
                token: "user-token".into(),
            }],
            header_name: HeaderName::from_static("authorization"),
        }
    }

    #[test]
    fn caller_auth_checks_exact_tokens() {
        let auth = auth();
        assert_eq!(auth.resolve("admin-token"), Some(Caller::Admin { id: 1 }));
        assert_eq!(auth.resolve("user-token"), Some(Caller::User { id: 42 }));
        assert_eq!(auth.resolve("user-token-2"), None);
        assert_eq!(auth.resolve("ADMIN-TOKEN"), None);
    }
}
