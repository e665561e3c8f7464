//! Domain operations behind the HTTP handlers. Every mutating operation
//! runs in one transaction and runs its notifications before committing.

pub mod clusters;
pub mod messages;
pub mod nodes;
pub mod servers;
pub mod settings;
pub mod stats;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

use crate::{
    auth::Caller,
    error::{not_found, permission_denied, require_id},
    persistence::{
        servers::{self as server_store, ServerRecord},
        Conn,
    },
};

/// Load an enabled server the caller may change. Administrators reach every
/// server; users only their own.
pub(crate) async fn server_for_caller(
    conn: &mut Conn,
    caller: &Caller,
    server_id: i64,
) -> crate::Result<ServerRecord> {
    require_id(server_id, "server")?;
    let record = server_store::get_enabled_server(conn, server_id)
        .await?
        .ok_or_else(|| not_found("server"))?;
    match caller {
        Caller::Admin { .. } => Ok(record),
        Caller::User { id } if record.user_id == *id => Ok(record),
        Caller::User { .. } => Err(permission_denied("server belongs to another user")),
        Caller::Node { .. } => Err(permission_denied("nodes cannot change servers")),
    }
}

/// Clamp a requested page size to the configured listing limit.
pub(crate) fn page_limit(requested: Option<u32>, max: u32) -> u32 {
    requested.filter(|limit| *limit > 0).unwrap_or(max).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limit_is_bounded() {
        assert_eq!(page_limit(None, 100), 100);
        assert_eq!(page_limit(Some(0), 100), 100);
        assert_eq!(page_limit(Some(20), 100), 20);
        assert_eq!(page_limit(Some(500), 100), 100);
    }
}
