//! Review of user-submitted server names.
//!
//! A submission parks the new list next to the live one. An administrator
//! then approves it (the list goes live in one statement) or rejects it
//! (the live list stays and the reason is recorded). Either decision
//! recomposes the server, notifies DNS and messages the owning user.

use chrono::{DateTime, Utc};
use common::{
    api::{AuditingResult, MessageLevel, MessageType},
    config::GlobalServerConfig,
};
use serde::Serialize;
use tracing::info;

use crate::{
    auth::Caller,
    error::{invalid_argument, malformed, not_found, require_id},
    messaging::{self, Notice},
    persistence::{
        servers::{self, ServerRecord},
        settings::{self, SERVER_GLOBAL_CONFIG},
        Conn,
    },
    propagation, Result,
};

/// Review state derived from a server row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NamesState {
    Live,
    Pending,
    Approved,
    Rejected,
}

impl NamesState {
    pub fn of(record: &ServerRecord) -> Result<Self> {
        if record.is_auditing {
            return Ok(NamesState::Pending);
        }
        match last_result(record)? {
            Some(result) if result.is_ok => Ok(NamesState::Approved),
            Some(_) => Ok(NamesState::Rejected),
            None => Ok(NamesState::Live),
        }
    }
}

/// Last review decision stored on the row, if any.
pub fn last_result(record: &ServerRecord) -> Result<Option<AuditingResult>> {
    match record.auditing_result_json.as_deref() {
        Some(raw) if crate::composer::is_present(Some(raw)) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|err| malformed("auditing result", err)),
        _ => Ok(None),
    }
}

/// Parsed platform settings. Missing or empty settings mean defaults.
pub async fn read_global_config(conn: &mut Conn) -> Result<GlobalServerConfig> {
    let raw = settings::read_setting(conn, SERVER_GLOBAL_CONFIG).await?;
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(GlobalServerConfig::default());
    }
    serde_json::from_slice(&raw).map_err(|err| malformed("server global config", err))
}

/// Whether a names change by `caller` on a server owned by `owner_id` has to
/// go through review.
pub fn requires_review(global: &GlobalServerConfig, caller: &Caller, owner_id: i64) -> bool {
    global.http_all.domain_auditing_is_on && !caller.is_admin() && owner_id > 0
}

/// Apply an administrator's decision on a pending submission.
pub async fn review_server_names(
    conn: &mut Conn,
    server_id: i64,
    approve: bool,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<NamesState> {
    require_id(server_id, "server")?;
    let record = servers::get_enabled_server(conn, server_id)
        .await?
        .ok_or_else(|| not_found("server"))?;
    if !record.is_auditing {
        return Err(invalid_argument("server names are not waiting for review"));
    }

    let result = AuditingResult {
        is_ok: approve,
        reason: reason.trim().to_string(),
        created_at: now.timestamp(),
    };
    let result_json = serde_json::to_string(&result)?;
    let updated = if approve {
        servers::approve_auditing_server_names(conn, server_id, &result_json).await?
    } else {
        servers::reject_auditing_server_names(conn, server_id, &result_json).await?
    };
    if updated == 0 {
        return Err(not_found("server"));
    }

    propagation::notify_update(conn, server_id).await?;
    propagation::notify_dns_update(conn, server_id).await?;

    if record.user_id > 0 {
        let notice = if approve {
            Notice::new(
                MessageType::ServerNamesAuditingSuccess,
                MessageLevel::Success,
                format!("server names of \"{}\" approved", record.name),
                "",
            )
        } else {
            Notice::new(
                MessageType::ServerNamesAuditingFailed,
                MessageLevel::Error,
                format!("server names of \"{}\" rejected", record.name),
                result.reason.clone(),
            )
        };
        messaging::create_message(conn, 0, record.user_id, &notice, now).await?;
    }

    info!(server_id, approve, "server names reviewed");
    Ok(if approve {
        NamesState::Approved
    } else {
        NamesState::Rejected
    })
}
