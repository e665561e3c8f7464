//! Shared API DTOs used across the control-plane and edge consumers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ServerConfig;

/// Error returned when a stored or wire string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    /// Name of the enum that failed to parse.
    pub kind: &'static str,
    /// Offending input.
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Implements `FromStr`, `TryFrom<String>` and `Display` in terms of the
/// enum's `as_str` table so the database and wire spellings never drift.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, [$($variant:ident),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                $(
                    if value == $ty::$variant.as_str() {
                        return Ok($ty::$variant);
                    }
                )+
                Err(ParseEnumError {
                    kind: $kind,
                    value: value.to_string(),
                })
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ParseEnumError;

            fn try_from(value: String) -> Result<Self, ParseEnumError> {
                value.parse()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Scope a pending task targets. An id of zero means "everything in scope".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskScope {
    /// Every node of a cluster.
    Cluster,
    /// A single edge node.
    Node,
    /// A single server (virtual host).
    Server,
    /// A DNS domain. Only used by the DNS stream.
    Domain,
}

impl TaskScope {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskScope::Cluster => "cluster",
            TaskScope::Node => "node",
            TaskScope::Server => "server",
            TaskScope::Domain => "domain",
        }
    }
}

string_enum!(TaskScope, "task scope", [Cluster, Node, Server, Domain]);

/// Kind of convergence work a config task signals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum NodeTaskType {
    /// Composed configuration under the scope changed; re-pull configs.
    ConfigChanged,
    /// IP list items under the scope changed; re-pull IP lists.
    IpItemChanged,
}

impl NodeTaskType {
    /// Returns the canonical camelCase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeTaskType::ConfigChanged => "configChanged",
            NodeTaskType::IpItemChanged => "ipItemChanged",
        }
    }
}

string_enum!(NodeTaskType, "node task type", [ConfigChanged, IpItemChanged]);

/// Kind of DNS convergence work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum DnsTaskType {
    /// Cluster DNS binding changed; resync every record of the cluster.
    ClusterChange,
    /// A node's addresses or membership changed.
    NodeChange,
    /// A server's DNS-visible facts changed.
    ServerChange,
    /// A DNS domain changed.
    DomainChange,
}

impl DnsTaskType {
    /// Returns the canonical camelCase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsTaskType::ClusterChange => "clusterChange",
            DnsTaskType::NodeChange => "nodeChange",
            DnsTaskType::ServerChange => "serverChange",
            DnsTaskType::DomainChange => "domainChange",
        }
    }
}

string_enum!(
    DnsTaskType,
    "dns task type",
    [ClusterChange, NodeChange, ServerChange, DomainChange]
);

/// Notification message types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A health check against a node failed.
    HealthCheckFailed,
    /// Health check marked a node up.
    HealthCheckNodeUp,
    /// Health check marked a node down.
    HealthCheckNodeDown,
    /// A node stopped reporting.
    NodeInactive,
    /// A node resumed reporting.
    NodeActive,
    /// Cluster DNS synchronisation failed.
    ClusterDnsSyncFailed,
    /// An SSL certificate is about to expire.
    SslCertExpiring,
    /// An ACME issuance task failed.
    SslCertAcmeTaskFailed,
    /// An ACME issuance task succeeded.
    SslCertAcmeTaskSuccess,
    /// Log storage capacity overflowed.
    LogCapacityOverflow,
    /// Submitted server names were approved.
    ServerNamesAuditingSuccess,
    /// Submitted server names were rejected.
    ServerNamesAuditingFailed,
    /// A configured threshold was satisfied.
    ThresholdSatisfied,
}

impl MessageType {
    /// Returns the canonical representation used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::HealthCheckFailed => "HealthCheckFailed",
            MessageType::HealthCheckNodeUp => "HealthCheckNodeUp",
            MessageType::HealthCheckNodeDown => "HealthCheckNodeDown",
            MessageType::NodeInactive => "NodeInactive",
            MessageType::NodeActive => "NodeActive",
            MessageType::ClusterDnsSyncFailed => "ClusterDnsSyncFailed",
            MessageType::SslCertExpiring => "SslCertExpiring",
            MessageType::SslCertAcmeTaskFailed => "SslCertAcmeTaskFailed",
            MessageType::SslCertAcmeTaskSuccess => "SslCertAcmeTaskSuccess",
            MessageType::LogCapacityOverflow => "LogCapacityOverflow",
            MessageType::ServerNamesAuditingSuccess => "ServerNamesAuditingSuccess",
            MessageType::ServerNamesAuditingFailed => "ServerNamesAuditingFailed",
            MessageType::ThresholdSatisfied => "ThresholdSatisfied",
        }
    }
}

string_enum!(
    MessageType,
    "message type",
    [
        HealthCheckFailed,
        HealthCheckNodeUp,
        HealthCheckNodeDown,
        NodeInactive,
        NodeActive,
        ClusterDnsSyncFailed,
        SslCertExpiring,
        SslCertAcmeTaskFailed,
        SslCertAcmeTaskSuccess,
        LogCapacityOverflow,
        ServerNamesAuditingSuccess,
        ServerNamesAuditingFailed,
        ThresholdSatisfied,
    ]
);

/// Severity attached to a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    /// Informational.
    Info,
    /// Needs attention.
    Warning,
    /// Something failed.
    Error,
    /// Something completed successfully.
    Success,
}

impl MessageLevel {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageLevel::Info => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
            MessageLevel::Success => "success",
        }
    }
}

string_enum!(MessageLevel, "message level", [Info, Warning, Error, Success]);

/// Message type a receiver subscribes to.
///
/// `Any` is stored and transmitted as `"*"`; it can never collide with a real
/// [`MessageType`] because parsing a concrete type never yields `Any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverType {
    /// Matches every message type.
    Any,
    /// Matches exactly one message type.
    Specific(MessageType),
}

impl ReceiverType {
    /// Storage and wire marker for [`ReceiverType::Any`].
    pub const ANY_MARKER: &'static str = "*";

    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverType::Any => Self::ANY_MARKER,
            ReceiverType::Specific(kind) => kind.as_str(),
        }
    }

    /// Whether a message of `kind` is delivered to this receiver.
    pub fn matches(&self, kind: MessageType) -> bool {
        match self {
            ReceiverType::Any => true,
            ReceiverType::Specific(own) => *own == kind,
        }
    }
}

impl FromStr for ReceiverType {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == Self::ANY_MARKER {
            return Ok(ReceiverType::Any);
        }
        value
            .parse::<MessageType>()
            .map(ReceiverType::Specific)
            .map_err(|_| ParseEnumError {
                kind: "receiver type",
                value: value.to_string(),
            })
    }
}

impl TryFrom<String> for ReceiverType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, ParseEnumError> {
        value.parse()
    }
}

impl fmt::Display for ReceiverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReceiverType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReceiverType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Delivery state of a message task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageTaskStatus {
    /// Waiting for a delivery worker.
    Pending,
    /// Claimed by a delivery worker.
    Sending,
    /// Delivered.
    Success,
    /// Delivery failed; see the task result.
    Failed,
}

impl MessageTaskStatus {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageTaskStatus::Pending => "pending",
            MessageTaskStatus::Sending => "sending",
            MessageTaskStatus::Success => "success",
            MessageTaskStatus::Failed => "failed",
        }
    }
}

string_enum!(
    MessageTaskStatus,
    "message task status",
    [Pending, Sending, Success, Failed]
);

/// Outcome of a server-names audit decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditingResult {
    /// Whether the submitted names were approved.
    pub is_ok: bool,
    /// Reviewer-provided reason, usually set on rejection.
    #[serde(default)]
    pub reason: String,
    /// Unix timestamp of the decision.
    #[serde(default)]
    pub created_at: i64,
}

/// Pending config task as seen by an edge node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeTask {
    /// Monotonic task id, also the cursor key.
    pub id: i64,
    /// Scope kind.
    pub scope: TaskScope,
    /// Scope id (zero means every entity in scope).
    pub scope_id: i64,
    /// Work signalled by the task.
    pub task_type: NodeTaskType,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Pending DNS task as seen by the DNS synchroniser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsTask {
    /// Monotonic task id, also the cursor key.
    pub id: i64,
    /// Scope kind.
    pub scope: TaskScope,
    /// Scope id.
    pub scope_id: i64,
    /// Cluster owning the scope, when known.
    pub cluster_id: i64,
    /// DNS domain owning the scope, when known.
    pub domain_id: i64,
    /// Work signalled by the task.
    pub task_type: DnsTaskType,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Paginated list response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Requested page size.
    pub limit: u32,
    /// Requested offset.
    pub offset: u32,
    /// Items on this page.
    pub items: Vec<T>,
}

/// Tasks returned by a poll together with the consumer's current cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTaskPage {
    /// Cursor the consumer had acknowledged before this poll.
    pub cursor: i64,
    /// Tasks newer than the cursor, oldest first.
    pub tasks: Vec<NodeTask>,
}

/// DNS tasks returned by a poll together with the consumer's cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsTaskPage {
    /// Cursor the consumer had acknowledged before this poll.
    pub cursor: i64,
    /// Tasks newer than the cursor, oldest first.
    pub tasks: Vec<DnsTask>,
}

/// Acknowledge everything up to and including `last_task_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAckRequest {
    /// Highest task id the consumer has applied.
    pub last_task_id: i64,
}

/// Cursor after an acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAckResponse {
    /// Stored cursor; never moves backwards.
    pub cursor: i64,
}

/// Lightweight version entry used for compare-and-pull.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfigVersion {
    /// Server id.
    pub server_id: i64,
    /// Monotonic config version.
    pub version: i64,
}

/// Cached composed config of one server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfigItem {
    /// Server id.
    pub server_id: i64,
    /// Monotonic config version.
    pub version: i64,
    /// Composed configuration, absent until the first successful compose.
    pub config: Option<ServerConfig>,
}

/// Per-request statistics uploaded by an edge node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequestStatUpload {
    /// Month bucket (`YYYYMM`); defaults to the current month.
    #[serde(default)]
    pub month: String,
    /// Day bucket (`YYYYMMDD`); defaults to the current day.
    #[serde(default)]
    pub day: String,
    /// Region counts.
    #[serde(default)]
    pub region_cities: Vec<RegionCityStat>,
    /// Network provider counts.
    #[serde(default)]
    pub region_providers: Vec<NamedStat>,
    /// Client operating system counts.
    #[serde(default)]
    pub systems: Vec<VersionedStat>,
    /// Client browser counts.
    #[serde(default)]
    pub browsers: Vec<VersionedStat>,
    /// Firewall rule group hits.
    #[serde(default)]
    pub firewall_rule_groups: Vec<FirewallRuleGroupStat>,
}

/// Region counter for one server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionCityStat {
    /// Server id.
    pub server_id: i64,
    /// Country name.
    #[serde(default)]
    pub country_name: String,
    /// Province name.
    #[serde(default)]
    pub province_name: String,
    /// City name.
    #[serde(default)]
    pub city_name: String,
    /// Request count.
    pub count: i64,
}

/// Counter keyed by a single name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedStat {
    /// Server id.
    pub server_id: i64,
    /// Item name.
    pub name: String,
    /// Request count.
    pub count: i64,
}

/// Counter keyed by a name and a version string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionedStat {
    /// Server id.
    pub server_id: i64,
    /// Item name.
    pub name: String,
    /// Item version.
    #[serde(default)]
    pub version: String,
    /// Request count.
    pub count: i64,
}

/// Firewall rule group hit counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirewallRuleGroupStat {
    /// Server id.
    pub server_id: i64,
    /// Rule group id.
    pub http_firewall_rule_group_id: i64,
    /// Action taken.
    #[serde(default)]
    pub action: String,
    /// Hit count.
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enum_as_str_round_trips_through_from_str() {
        assert_eq!("cluster".parse::<TaskScope>(), Ok(TaskScope::Cluster));
        assert_eq!(
            "configChanged".parse::<NodeTaskType>(),
            Ok(NodeTaskType::ConfigChanged)
        );
        assert_eq!(
            "serverChange".parse::<DnsTaskType>(),
            Ok(DnsTaskType::ServerChange)
        );
        assert_eq!(MessageLevel::Warning.as_str(), "warning");
        assert!("bogus".parse::<MessageTaskStatus>().is_err());
    }

    #[test]
    fn level_with_error_variant_converts_from_string() {
        assert_eq!(
            MessageLevel::try_from("error".to_string()),
            Ok(MessageLevel::Error)
        );
        let err = MessageLevel::try_from("fatal".to_string()).expect_err("unknown level");
        assert_eq!(err.to_string(), r#"unknown message level value: "fatal""#);
    }

    #[test]
    fn receiver_type_wildcard_matches_every_type() {
        let any = ReceiverType::Any;
        assert!(any.matches(MessageType::HealthCheckFailed));
        assert!(any.matches(MessageType::ThresholdSatisfied));

        let specific = ReceiverType::Specific(MessageType::NodeInactive);
        assert!(specific.matches(MessageType::NodeInactive));
        assert!(!specific.matches(MessageType::NodeActive));
    }

    #[test]
    fn receiver_type_uses_star_marker() {
        assert_eq!("*".parse::<ReceiverType>(), Ok(ReceiverType::Any));
        assert_eq!(
            "HealthCheckFailed".parse::<ReceiverType>(),
            Ok(ReceiverType::Specific(MessageType::HealthCheckFailed))
        );
        assert!("**".parse::<ReceiverType>().is_err());

        let encoded = serde_json::to_value(ReceiverType::Any).expect("serialize");
        assert_eq!(encoded, json!("*"));
        let decoded: ReceiverType =
            serde_json::from_value(json!("NodeActive")).expect("deserialize");
        assert_eq!(decoded, ReceiverType::Specific(MessageType::NodeActive));
    }

    #[test]
    fn auditing_result_defaults_optional_fields() {
        let result: AuditingResult =
            serde_json::from_value(json!({"isOk": true})).expect("deserialize");
        assert!(result.is_ok);
        assert!(result.reason.is_empty());
        assert_eq!(result.created_at, 0);
    }
}
