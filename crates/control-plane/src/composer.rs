//! Rebuilds the effective configuration of a server from its stored row and
//! the sub-entities it references.
//!
//! Composition has no side effects. A stored blob that fails to decode is a
//! hard [`DomainError::MalformedData`](crate::error::DomainError) error; a
//! reference to a missing or disabled entity leaves the resolved field empty.

use common::config::{
    HstsConfig, HttpProtocolConfig, HttpsProtocolConfig, OriginConfig, ReverseProxyConfig,
    ReverseProxyRef, SchedulingConfig, ServerConfig, ServerNameConfig, SslCertRef,
    SslPolicyConfig, TcpProtocolConfig, TlsProtocolConfig, UdpProtocolConfig,
    UnixProtocolConfig, WebConfig, WebSettings,
};
use serde::de::DeserializeOwned;

use crate::{
    error::{malformed, not_found, require_id},
    persistence::{clusters, dns_domains, policies, servers, Conn},
    Result,
};

/// Whether a stored blob carries a value. Absent, empty and `null` do not.
pub fn is_present(raw: Option<&str>) -> bool {
    matches!(raw.map(str::trim), Some(value) if !value.is_empty() && value != "null")
}

fn decode_opt<T: DeserializeOwned>(field: &'static str, raw: Option<&str>) -> Result<Option<T>> {
    if !is_present(raw) {
        return Ok(None);
    }
    let raw = raw.unwrap_or_default();
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|err| malformed(field, err))
}

fn decode_or_default<T: DeserializeOwned + Default>(
    field: &'static str,
    raw: Option<&str>,
) -> Result<T> {
    Ok(decode_opt(field, raw)?.unwrap_or_default())
}

/// Compose the full configuration of an enabled server.
///
/// Returns the not-found sentinel when the server is missing or disabled.
pub async fn compose_server_config(conn: &mut Conn, server_id: i64) -> Result<ServerConfig> {
    require_id(server_id, "server")?;
    let server = servers::get_enabled_server(conn, server_id)
        .await?
        .ok_or_else(|| not_found("server"))?;

    let mut config = ServerConfig {
        id: server.id,
        kind: server.kind.clone(),
        is_on: server.is_on,
        name: server.name.clone(),
        description: server.description.clone(),
        ..ServerConfig::default()
    };

    config.server_names = decode_or_default::<Vec<ServerNameConfig>>(
        "server names",
        Some(server.server_names_json.as_str()),
    )?;
    config.alias_server_names =
        compose_alias_names(conn, server.cluster_id, &server.dns_name).await?;

    config.http = decode_opt::<HttpProtocolConfig>("http config", server.http_json.as_deref())?;

    if let Some(mut https) =
        decode_opt::<HttpsProtocolConfig>("https config", server.https_json.as_deref())?
    {
        if let Some(policy_id) = https.ssl_policy_ref.as_ref().map(|r| r.ssl_policy_id) {
            https.ssl_policy = compose_ssl_policy(conn, policy_id).await?;
        }
        config.https = Some(https);
    }

    config.tcp = decode_opt::<TcpProtocolConfig>("tcp config", server.tcp_json.as_deref())?;

    if let Some(mut tls) =
        decode_opt::<TlsProtocolConfig>("tls config", server.tls_json.as_deref())?
    {
        if let Some(policy_id) = tls.ssl_policy_ref.as_ref().map(|r| r.ssl_policy_id) {
            tls.ssl_policy = compose_ssl_policy(conn, policy_id).await?;
        }
        config.tls = Some(tls);
    }

    config.unix = decode_opt::<UnixProtocolConfig>("unix config", server.unix_json.as_deref())?;
    config.udp = decode_opt::<UdpProtocolConfig>("udp config", server.udp_json.as_deref())?;

    if server.web_id > 0 {
        config.web = compose_web(conn, server.web_id).await?;
    }

    if let Some(reverse_proxy_ref) =
        decode_opt::<ReverseProxyRef>("reverse proxy", server.reverse_proxy_json.as_deref())?
    {
        config.reverse_proxy =
            compose_reverse_proxy(conn, reverse_proxy_ref.reverse_proxy_id).await?;
        config.reverse_proxy_ref = Some(reverse_proxy_ref);
    }

    Ok(config)
}

/// Canonical encoding used for the change-gate hash and the config cache.
pub fn encode_server_config(config: &ServerConfig) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(config)?)
}

async fn compose_alias_names(
    conn: &mut Conn,
    cluster_id: i64,
    dns_name: &str,
) -> Result<Vec<String>> {
    if cluster_id <= 0 || dns_name.is_empty() {
        return Ok(Vec::new());
    }
    let Some(cluster_dns) = clusters::find_cluster_dns(conn, cluster_id).await? else {
        return Ok(Vec::new());
    };
    if cluster_dns.dns_domain_id <= 0 {
        return Ok(Vec::new());
    }
    let Some(domain) = dns_domains::get_enabled_domain(conn, cluster_dns.dns_domain_id).await?
    else {
        return Ok(Vec::new());
    };
    if domain.name.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![format!("{dns_name}.{}", domain.name)])
}

/// Materialize an SSL policy; `None` when it does not exist.
pub async fn compose_ssl_policy(conn: &mut Conn, policy_id: i64) -> Result<Option<SslPolicyConfig>> {
    if policy_id <= 0 {
        return Ok(None);
    }
    let Some(policy) = policies::get_enabled_ssl_policy(conn, policy_id).await? else {
        return Ok(None);
    };

    Ok(Some(SslPolicyConfig {
        id: policy.id,
        is_on: policy.is_on,
        certs: decode_or_default::<Vec<SslCertRef>>("ssl certs", policy.certs_json.as_deref())?,
        min_version: policy.min_version,
        cipher_suites: decode_or_default::<Vec<String>>(
            "ssl cipher suites",
            policy.cipher_suites_json.as_deref(),
        )?,
        hsts: decode_opt::<HstsConfig>("ssl hsts", policy.hsts_json.as_deref())?,
    }))
}

pub async fn compose_web(conn: &mut Conn, web_id: i64) -> Result<Option<WebConfig>> {
    let Some(web) = policies::get_enabled_web(conn, web_id).await? else {
        return Ok(None);
    };
    Ok(Some(WebConfig {
        id: web.id,
        is_on: web.is_on,
        settings: decode_or_default::<WebSettings>("web config", web.config_json.as_deref())?,
    }))
}

pub async fn compose_reverse_proxy(
    conn: &mut Conn,
    reverse_proxy_id: i64,
) -> Result<Option<ReverseProxyConfig>> {
    if reverse_proxy_id <= 0 {
        return Ok(None);
    }
    let Some(proxy) = policies::get_enabled_reverse_proxy(conn, reverse_proxy_id).await? else {
        return Ok(None);
    };
    Ok(Some(ReverseProxyConfig {
        id: proxy.id,
        is_on: proxy.is_on,
        scheduling: decode_opt::<SchedulingConfig>(
            "reverse proxy scheduling",
            proxy.scheduling_json.as_deref(),
        )?,
        primary_origins: decode_or_default::<Vec<OriginConfig>>(
            "primary origins",
            proxy.primary_origins_json.as_deref(),
        )?,
        backup_origins: decode_or_default::<Vec<OriginConfig>>(
            "backup origins",
            proxy.backup_origins_json.as_deref(),
        )?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{is_not_found, DomainError},
        persistence::{
            clusters::NewCluster,
            migrations,
            policies::{NewReverseProxy, NewSslPolicy},
            servers::NewServer,
            Db,
        },
    };
    use common::config::ClusterDnsConfig;

    async fn setup_db() -> Db {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        db
    }

    async fn seed_cluster(conn: &mut Conn) -> i64 {
        clusters::create_cluster(
            conn,
            NewCluster {
                admin_id: 1,
                name: "edge".into(),
                unique_id: "c".repeat(32),
                secret_hash: "hash".into(),
                dns: ClusterDnsConfig::default(),
            },
        )
        .await
        .expect("cluster")
    }

    #[tokio::test]
    async fn composes_references_and_alias_names() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let cluster_id = seed_cluster(&mut conn).await;
        let domain_id = dns_domains::create_domain(&mut conn, "cdn.example.net")
            .await
            .expect("domain");
        clusters::update_dns(
            &mut conn,
            cluster_id,
            domain_id,
            "edge",
            &ClusterDnsConfig::default(),
        )
        .await
        .expect("dns");

        let policy_id = policies::create_ssl_policy(
            &mut conn,
            NewSslPolicy {
                certs_json: Some(r#"[{"isOn":true,"certId":4}]"#.into()),
                min_version: "TLS 1.2".into(),
                ..NewSslPolicy::default()
            },
        )
        .await
        .expect("policy");
        let web_id = policies::create_web(&mut conn, 1, 0, r#"{"index":["index.html"]}"#)
            .await
            .expect("web");
        let proxy_id = policies::create_reverse_proxy(
            &mut conn,
            NewReverseProxy {
                primary_origins_json: Some(
                    r#"[{"isOn":true,"addr":{"protocol":"http","host":"10.0.0.9","portRange":"80"}}]"#
                        .into(),
                ),
                ..NewReverseProxy::default()
            },
        )
        .await
        .expect("proxy");

        let server_id = servers::create_server(
            &mut conn,
            NewServer {
                kind: "httpProxy".into(),
                name: "site".into(),
                cluster_id,
                https_json: Some(format!(
                    r#"{{"isOn":true,"sslPolicyRef":{{"isOn":true,"sslPolicyId":{policy_id}}}}}"#
                )),
                tcp_json: Some("null".into()),
                web_id,
                reverse_proxy_json: Some(format!(
                    r#"{{"isOn":true,"reverseProxyId":{proxy_id}}}"#
                )),
                server_names_json: r#"[{"name":"example.com"}]"#.into(),
                dns_name: "ab12cd34".into(),
                ..NewServer::default()
            },
        )
        .await
        .expect("server");

        let config = compose_server_config(&mut conn, server_id)
            .await
            .expect("compose");
        assert_eq!(config.server_names[0].name, "example.com");
        assert_eq!(config.alias_server_names, vec!["ab12cd34.cdn.example.net"]);
        assert!(config.tcp.is_none());
        let policy = config
            .https
            .as_ref()
            .and_then(|h| h.ssl_policy.as_ref())
            .expect("policy resolved");
        assert_eq!(policy.min_version, "TLS 1.2");
        assert_eq!(policy.certs[0].cert_id, 4);
        assert_eq!(
            config.web.as_ref().map(|w| w.settings.index.clone()),
            Some(vec!["index.html".to_string()])
        );
        assert_eq!(
            config
                .reverse_proxy
                .as_ref()
                .map(|p| p.primary_origins.len()),
            Some(1)
        );

        let again = compose_server_config(&mut conn, server_id)
            .await
            .expect("compose again");
        assert_eq!(
            encode_server_config(&config).expect("encode"),
            encode_server_config(&again).expect("encode")
        );
    }

    #[tokio::test]
    async fn missing_references_degrade_to_none() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let server_id = servers::create_server(
            &mut conn,
            NewServer {
                kind: "httpProxy".into(),
                name: "site".into(),
                https_json: Some(r#"{"isOn":true,"sslPolicyRef":{"sslPolicyId":99}}"#.into()),
                web_id: 77,
                reverse_proxy_json: Some(r#"{"reverseProxyId":5}"#.into()),
                server_names_json: "[]".into(),
                dns_name: "00000001".into(),
                ..NewServer::default()
            },
        )
        .await
        .expect("server");

        let config = compose_server_config(&mut conn, server_id)
            .await
            .expect("compose");
        assert!(config.https.expect("https").ssl_policy.is_none());
        assert!(config.web.is_none());
        assert!(config.reverse_proxy.is_none());
        assert_eq!(config.reverse_proxy_ref.map(|r| r.reverse_proxy_id), Some(5));
        assert!(config.alias_server_names.is_empty());
    }

    #[tokio::test]
    async fn malformed_blobs_and_missing_servers_are_errors() {
        let db = setup_db().await;
        let mut conn = db.acquire().await.expect("conn");
        let server_id = servers::create_server(
            &mut conn,
            NewServer {
                kind: "tcpProxy".into(),
                name: "broken".into(),
                tcp_json: Some("{not json".into()),
                server_names_json: "[]".into(),
                dns_name: "00000002".into(),
                ..NewServer::default()
            },
        )
        .await
        .expect("server");

        let err = compose_server_config(&mut conn, server_id)
            .await
            .expect_err("malformed");
        assert!(matches!(
            err.downcast_ref::<DomainError>(),
            Some(DomainError::MalformedData {
                field: "tcp config",
                ..
            })
        ));

        let err = compose_server_config(&mut conn, 4242)
            .await
            .expect_err("missing");
        assert!(is_not_found(&err));
        assert!(compose_server_config(&mut conn, 0).await.is_err());
    }
}
