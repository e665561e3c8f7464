use common::api::{MessageType, ReceiverType};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{Conn, STATE_DISABLED, STATE_ENABLED};
use crate::Result;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MessageReceiverRecord {
    pub id: i64,
    pub cluster_id: i64,
    pub node_id: i64,
    pub server_id: i64,
    #[sqlx(rename = "type", try_from = "String")]
    #[serde(rename = "type")]
    pub kind: ReceiverType,
    pub params_json: Option<String>,
    pub recipient_id: i64,
    pub recipient_group_id: i64,
}

/// Receivers are attached to a cluster, a node of it or a server of it. Zero
/// components widen the scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverScope {
    pub cluster_id: i64,
    #[serde(default)]
    pub node_id: i64,
    #[serde(default)]
    pub server_id: i64,
}

impl ReceiverScope {
    pub fn cluster(cluster_id: i64) -> Self {
        Self {
            cluster_id,
            ..Self::default()
        }
    }

    pub fn node(cluster_id: i64, node_id: i64) -> Self {
        Self {
            cluster_id,
            node_id,
            server_id: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMessageReceiver {
    pub scope: ReceiverScope,
    pub kind: ReceiverType,
    pub params_json: Option<String>,
    pub recipient_id: i64,
    pub recipient_group_id: i64,
}

pub async fn create_receiver(conn: &mut Conn, receiver: NewMessageReceiver) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO message_receivers (
            cluster_id, node_id, server_id, type, params_json, recipient_id, recipient_group_id, state
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(receiver.scope.cluster_id)
    .bind(receiver.scope.node_id)
    .bind(receiver.scope.server_id)
    .bind(receiver.kind.as_str())
    .bind(receiver.params_json.as_deref())
    .bind(receiver.recipient_id)
    .bind(receiver.recipient_group_id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn disable_receivers(conn: &mut Conn, scope: ReceiverScope) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE message_receivers
        SET state = ?1
        WHERE cluster_id = ?2 AND node_id = ?3 AND server_id = ?4 AND state = ?5
        "#,
    )
    .bind(STATE_DISABLED)
    .bind(scope.cluster_id)
    .bind(scope.node_id)
    .bind(scope.server_id)
    .bind(STATE_ENABLED)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Enabled receivers of exactly this scope. With `kind` set, only receivers
/// subscribed to that type or to every type are returned.
pub async fn list_enabled_receivers(
    conn: &mut Conn,
    scope: ReceiverScope,
    kind: Option<MessageType>,
) -> Result<Vec<MessageReceiverRecord>> {
    let records = sqlx::query_as::<_, MessageReceiverRecord>(
        r#"
        SELECT id, cluster_id, node_id, server_id, type, params_json, recipient_id, recipient_group_id
        FROM message_receivers
        WHERE cluster_id = ?1
          AND node_id = ?2
          AND server_id = ?3
          AND state = ?4
          AND (?5 IS NULL OR type = ?6 OR type = ?5)
        ORDER BY id
        "#,
    )
    .bind(scope.cluster_id)
    .bind(scope.node_id)
    .bind(scope.server_id)
    .bind(STATE_ENABLED)
    .bind(kind.map(|k| k.as_str()))
    .bind(ReceiverType::ANY_MARKER)
    .fetch_all(&mut *conn)
    .await?;
    Ok(records)
}

pub async fn count_enabled_receivers(
    conn: &mut Conn,
    scope: ReceiverScope,
    kind: Option<MessageType>,
) -> Result<i64> {
    let count = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM message_receivers
        WHERE cluster_id = ?1
          AND node_id = ?2
          AND server_id = ?3
          AND state = ?4
          AND (?5 IS NULL OR type = ?6 OR type = ?5)
        "#,
    )
    .bind(scope.cluster_id)
    .bind(scope.node_id)
    .bind(scope.server_id)
    .bind(STATE_ENABLED)
    .bind(kind.map(|k| k.as_str()))
    .bind(ReceiverType::ANY_MARKER)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}
