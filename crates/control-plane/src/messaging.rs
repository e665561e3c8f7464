//! Operator notifications: message creation, dedupe of repeated node alerts
//! and fan-out to the receivers subscribed in a cluster or node scope.

use chrono::{DateTime, Utc};
use common::api::{MessageLevel, MessageType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    config::MessagingConfig,
    error::require_id,
    metrics,
    persistence::{
        message_receivers::{self, ReceiverScope},
        message_tasks::{self, NewMessageTask},
        messages::{self, NewMessage},
        Conn,
    },
    Result,
};

/// Stored subjects are cut to this many characters plus an ellipsis.
pub const MAX_SUBJECT_CHARS: usize = 100;

/// Content of a message before it is addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub level: MessageLevel,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

impl Notice {
    pub fn new(
        kind: MessageType,
        level: MessageLevel,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            level,
            subject: subject.into(),
            body: body.into(),
            params: None,
        }
    }

    fn params_json(&self) -> Result<Option<String>> {
        match &self.params {
            Some(value) if !value.is_null() => Ok(Some(serde_json::to_string(value)?)),
            _ => Ok(None),
        }
    }
}

/// Dedupe key over subject, body and params.
pub fn content_hash(subject: &str, body: &str, params_json: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(body.as_bytes());
    if let Some(params) = params_json {
        hasher.update(params.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub fn truncate_subject(subject: &str) -> String {
    match subject.char_indices().nth(MAX_SUBJECT_CHARS) {
        Some((cut, _)) => format!("{}...", &subject[..cut]),
        None => subject.to_string(),
    }
}

/// `YYYYMMDD` bucket used for retention.
pub fn day_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d").to_string()
}

#[derive(Debug, Clone, Copy, Default)]
struct Addressing {
    admin_id: i64,
    user_id: i64,
    cluster_id: i64,
    node_id: i64,
    server_id: i64,
}

async fn store(
    conn: &mut Conn,
    to: Addressing,
    notice: &Notice,
    hash: String,
    params_json: Option<String>,
    now: DateTime<Utc>,
) -> Result<i64> {
    messages::create_message(
        conn,
        NewMessage {
            admin_id: to.admin_id,
            user_id: to.user_id,
            cluster_id: to.cluster_id,
            node_id: to.node_id,
            server_id: to.server_id,
            kind: notice.kind,
            level: notice.level,
            subject: truncate_subject(&notice.subject),
            body: notice.body.clone(),
            params_json,
            hash,
            day: day_bucket(now),
            created_at: now.timestamp(),
        },
    )
    .await
}

/// Queue one delivery task per receiver of `scope` subscribed to the
/// notice's type. Returns how many were queued.
async fn fan_out(
    conn: &mut Conn,
    scope: ReceiverScope,
    message_id: i64,
    notice: &Notice,
    now: DateTime<Utc>,
) -> Result<usize> {
    let receivers =
        message_receivers::list_enabled_receivers(conn, scope, Some(notice.kind)).await?;
    let mut queued = 0;
    for receiver in receivers.into_iter().filter(|r| r.kind.matches(notice.kind)) {
        message_tasks::create_message_task(
            conn,
            NewMessageTask {
                message_id,
                recipient_id: receiver.recipient_id,
                recipient_group_id: receiver.recipient_group_id,
                subject: notice.subject.clone(),
                body: notice.body.clone(),
                is_primary: notice.level == MessageLevel::Error,
                created_at: now.timestamp(),
                ..NewMessageTask::default()
            },
        )
        .await?;
        queued += 1;
    }
    Ok(queued)
}

/// Message to an administrator (`user_id == 0`) or a user inbox. No
/// receivers are involved.
pub async fn create_message(
    conn: &mut Conn,
    admin_id: i64,
    user_id: i64,
    notice: &Notice,
    now: DateTime<Utc>,
) -> Result<i64> {
    let params_json = notice.params_json()?;
    let hash = content_hash(&notice.subject, &notice.body, params_json.as_deref());
    let id = store(
        conn,
        Addressing {
            admin_id,
            user_id,
            ..Addressing::default()
        },
        notice,
        hash,
        params_json,
        now,
    )
    .await?;
    metrics::record_message(if user_id > 0 { "user" } else { "admin" });
    Ok(id)
}

/// Cluster-wide message delivered to the cluster's receivers. Never
/// deduplicated.
pub async fn create_cluster_message(
    conn: &mut Conn,
    cluster_id: i64,
    notice: &Notice,
    now: DateTime<Utc>,
) -> Result<i64> {
    require_id(cluster_id, "cluster")?;
    let params_json = notice.params_json()?;
    let hash = content_hash(&notice.subject, &notice.body, params_json.as_deref());
    let id = store(
        conn,
        Addressing {
            cluster_id,
            ..Addressing::default()
        },
        notice,
        hash,
        params_json,
        now,
    )
    .await?;
    fan_out(conn, ReceiverScope::cluster(cluster_id), id, notice, now).await?;
    metrics::record_message("cluster");
    Ok(id)
}

/// Node message, dropped when an identical one was stored inside the dedupe
/// window. Cluster receivers and, for a concrete node, node receivers each
/// get a delivery task.
pub async fn create_node_message(
    conn: &mut Conn,
    cfg: &MessagingConfig,
    cluster_id: i64,
    node_id: i64,
    notice: &Notice,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    require_id(cluster_id, "cluster")?;
    let params_json = notice.params_json()?;
    let hash = content_hash(&notice.subject, &notice.body, params_json.as_deref());

    let window = i64::try_from(cfg.dedupe_window_secs).unwrap_or(i64::MAX);
    let since = now.timestamp().saturating_sub(window).saturating_add(1);
    if messages::exists_hash_since(conn, &hash, since).await? {
        metrics::record_message_suppressed();
        debug!(cluster_id, node_id, kind = %notice.kind, "duplicate node message suppressed");
        return Ok(None);
    }

    let id = store(
        conn,
        Addressing {
            cluster_id,
            node_id,
            ..Addressing::default()
        },
        notice,
        hash,
        params_json,
        now,
    )
    .await?;
    fan_out(conn, ReceiverScope::cluster(cluster_id), id, notice, now).await?;
    if node_id > 0 {
        fan_out(conn, ReceiverScope::node(cluster_id, node_id), id, notice, now).await?;
    }
    metrics::record_message("node");
    Ok(Some(id))
}
