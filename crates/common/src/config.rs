//! Composed server configuration schema.
//!
//! Every stored protocol blob and every reference is parsed into these types;
//! the control-plane serializes the composed [`ServerConfig`] with
//! `serde_json::to_vec`, so field order here is the canonical order. Only
//! structs, vectors and `BTreeMap`s are used to keep the encoding
//! deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A listen or origin address.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAddress {
    /// Protocol, e.g. `http`, `https`, `tcp`.
    #[serde(default)]
    pub protocol: String,
    /// Host, empty meaning every interface.
    #[serde(default)]
    pub host: String,
    /// Port or port range such as `80` or `8000-8010`.
    #[serde(default)]
    pub port_range: String,
}

/// Plain HTTP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpProtocolConfig {
    /// Whether the listener is active.
    #[serde(default)]
    pub is_on: bool,
    /// Listen addresses.
    #[serde(default)]
    pub listen: Vec<NetworkAddress>,
}

/// Reference from a protocol config to a stored SSL policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SslPolicyRef {
    /// Whether the reference is active.
    #[serde(default)]
    pub is_on: bool,
    /// Referenced policy id.
    #[serde(default)]
    pub ssl_policy_id: i64,
}

/// Reference to a certificate inside an SSL policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SslCertRef {
    /// Whether the certificate is used.
    #[serde(default)]
    pub is_on: bool,
    /// Certificate id.
    pub cert_id: i64,
}

/// HSTS settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HstsConfig {
    /// Whether HSTS is emitted.
    #[serde(default)]
    pub is_on: bool,
    /// `max-age` in seconds.
    #[serde(default)]
    pub max_age: i64,
    /// Adds `includeSubDomains`.
    #[serde(default)]
    pub include_sub_domains: bool,
    /// Adds `preload`.
    #[serde(default)]
    pub preload: bool,
}

/// Fully materialized SSL policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SslPolicyConfig {
    /// Policy id.
    pub id: i64,
    /// Whether the policy is active.
    pub is_on: bool,
    /// Certificates served by the policy.
    pub certs: Vec<SslCertRef>,
    /// Minimum TLS version, e.g. `TLS 1.2`.
    pub min_version: String,
    /// Allowed cipher suites; empty means the edge default.
    pub cipher_suites: Vec<String>,
    /// HSTS settings.
    pub hsts: Option<HstsConfig>,
}

/// HTTPS listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpsProtocolConfig {
    /// Whether the listener is active.
    #[serde(default)]
    pub is_on: bool,
    /// Listen addresses.
    #[serde(default)]
    pub listen: Vec<NetworkAddress>,
    /// Stored reference to an SSL policy.
    #[serde(default)]
    pub ssl_policy_ref: Option<SslPolicyRef>,
    /// Policy resolved from `ssl_policy_ref` during composition.
    #[serde(default)]
    pub ssl_policy: Option<SslPolicyConfig>,
}

/// TLS-terminating TCP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsProtocolConfig {
    /// Whether the listener is active.
    #[serde(default)]
    pub is_on: bool,
    /// Listen addresses.
    #[serde(default)]
    pub listen: Vec<NetworkAddress>,
    /// Stored reference to an SSL policy.
    #[serde(default)]
    pub ssl_policy_ref: Option<SslPolicyRef>,
    /// Policy resolved from `ssl_policy_ref` during composition.
    #[serde(default)]
    pub ssl_policy: Option<SslPolicyConfig>,
}

/// Plain TCP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TcpProtocolConfig {
    /// Whether the listener is active.
    #[serde(default)]
    pub is_on: bool,
    /// Listen addresses.
    #[serde(default)]
    pub listen: Vec<NetworkAddress>,
}

/// Unix socket listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnixProtocolConfig {
    /// Whether the listener is active.
    #[serde(default)]
    pub is_on: bool,
    /// Socket addresses.
    #[serde(default)]
    pub listen: Vec<NetworkAddress>,
}

/// UDP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UdpProtocolConfig {
    /// Whether the listener is active.
    #[serde(default)]
    pub is_on: bool,
    /// Listen addresses.
    #[serde(default)]
    pub listen: Vec<NetworkAddress>,
}

/// Stored body of a web config row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebSettings {
    /// Static root directory.
    #[serde(default)]
    pub root_dir: Option<String>,
    /// Index file names.
    #[serde(default)]
    pub index: Vec<String>,
    /// Response charset.
    #[serde(default)]
    pub charset: Option<String>,
    /// Whether response compression is enabled.
    #[serde(default)]
    pub compression_is_on: bool,
    /// Extra request headers keyed by name.
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
}

/// Materialized web config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebConfig {
    /// Web config id.
    pub id: i64,
    /// Whether the web config is active.
    pub is_on: bool,
    /// Settings body.
    #[serde(flatten)]
    pub settings: WebSettings,
}

/// Reference from a server to a stored reverse proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReverseProxyRef {
    /// Whether proxying is active.
    #[serde(default)]
    pub is_on: bool,
    /// Referenced reverse proxy id.
    #[serde(default)]
    pub reverse_proxy_id: i64,
}

/// Load-balancing algorithm and its options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingConfig {
    /// Algorithm code such as `roundRobin` or `hash`.
    pub code: String,
    /// Algorithm options.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

/// One upstream origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OriginConfig {
    /// Whether the origin receives traffic.
    #[serde(default)]
    pub is_on: bool,
    /// Origin address.
    pub addr: NetworkAddress,
    /// Relative weight.
    #[serde(default)]
    pub weight: u32,
}

/// Materialized reverse proxy with its upstream list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReverseProxyConfig {
    /// Reverse proxy id.
    pub id: i64,
    /// Whether the proxy is active.
    pub is_on: bool,
    /// Scheduling settings.
    pub scheduling: Option<SchedulingConfig>,
    /// Primary origins.
    pub primary_origins: Vec<OriginConfig>,
    /// Backup origins used when every primary is down.
    pub backup_origins: Vec<OriginConfig>,
}

/// One configured server name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerNameConfig {
    /// Host name or pattern.
    pub name: String,
    /// Match type, empty for exact.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Grouped sub names.
    #[serde(default)]
    pub sub_names: Vec<String>,
}

/// Fully composed server configuration delivered to edge nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Server id.
    pub id: i64,
    /// Server type, e.g. `httpProxy`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the server is active.
    pub is_on: bool,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Live server names.
    pub server_names: Vec<ServerNameConfig>,
    /// Names derived from the cluster DNS binding.
    pub alias_server_names: Vec<String>,
    /// HTTP listener.
    pub http: Option<HttpProtocolConfig>,
    /// HTTPS listener.
    pub https: Option<HttpsProtocolConfig>,
    /// TCP listener.
    pub tcp: Option<TcpProtocolConfig>,
    /// TLS listener.
    pub tls: Option<TlsProtocolConfig>,
    /// Unix socket listener.
    pub unix: Option<UnixProtocolConfig>,
    /// UDP listener.
    pub udp: Option<UdpProtocolConfig>,
    /// Web config.
    pub web: Option<WebConfig>,
    /// Stored reverse proxy reference.
    pub reverse_proxy_ref: Option<ReverseProxyRef>,
    /// Reverse proxy resolved from `reverse_proxy_ref`.
    pub reverse_proxy: Option<ReverseProxyConfig>,
}

/// Cluster DNS auto-sync flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDnsConfig {
    /// Sync node records automatically.
    #[serde(default)]
    pub nodes_auto_sync: bool,
    /// Sync server records automatically.
    #[serde(default)]
    pub servers_auto_sync: bool,
}

impl Default for ClusterDnsConfig {
    fn default() -> Self {
        Self {
            nodes_auto_sync: true,
            servers_auto_sync: true,
        }
    }
}

/// Cluster health-check policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Whether health checks run.
    #[serde(default)]
    pub is_on: bool,
    /// URL probed on each node.
    #[serde(default)]
    pub url: String,
    /// Probe interval in seconds.
    #[serde(default)]
    pub interval_secs: u32,
    /// Probe timeout in seconds.
    #[serde(default)]
    pub timeout_secs: u32,
    /// Successes needed before a node is considered up.
    #[serde(default)]
    pub count_up: u32,
    /// Failures needed before a node is considered down.
    #[serde(default)]
    pub count_down: u32,
    /// Take failing nodes out of DNS automatically.
    #[serde(default)]
    pub auto_down: bool,
}

/// TCP Option Address settings for a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToaConfig {
    /// Whether TOA is enabled.
    #[serde(default)]
    pub is_on: bool,
    /// Lowest netfilter queue id.
    #[serde(default)]
    pub min_queue_id: u16,
    /// Highest netfilter queue id.
    #[serde(default)]
    pub max_queue_id: u16,
    /// Automatically configure the netfilter queue.
    #[serde(default)]
    pub auto_setup: bool,
}

/// HTTP-wide global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpAllConfig {
    /// Route user-submitted server names through moderation.
    #[serde(default)]
    pub domain_auditing_is_on: bool,
    /// Prompt shown to users while names are under review.
    #[serde(default)]
    pub domain_auditing_prompt: String,
    /// Reject requests whose host matches no server name.
    #[serde(default)]
    pub match_domain_strictly: bool,
    /// Hosts allowed even when matching strictly.
    #[serde(default)]
    pub allow_mismatch_domains: Vec<String>,
}

/// Platform-wide server settings, stored under the `serverGlobalConfig` key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalServerConfig {
    /// HTTP-wide settings.
    #[serde(default)]
    pub http_all: HttpAllConfig,
}
