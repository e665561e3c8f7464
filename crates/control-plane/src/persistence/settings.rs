use super::Conn;
use crate::Result;

/// Key of the platform-wide server settings blob.
pub const SERVER_GLOBAL_CONFIG: &str = "serverGlobalConfig";

/// Raw stored value; an absent setting reads as empty bytes.
pub async fn read_setting(conn: &mut Conn, code: &str) -> Result<Vec<u8>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM sys_settings WHERE code = ?1")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value.map(String::into_bytes).unwrap_or_default())
}

pub async fn update_setting(conn: &mut Conn, code: &str, value: &[u8]) -> Result<()> {
    let value = std::str::from_utf8(value)
        .map_err(|err| crate::error::invalid_argument(format!("setting {code}: {err}")))?;
    sqlx::query(
        r#"
        INSERT INTO sys_settings (code, value, updated_at)
        VALUES (?1, ?2, datetime('now'))
        ON CONFLICT(code) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(code)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::migrations;

    #[tokio::test]
    async fn missing_setting_reads_empty_and_upserts() {
        let db = migrations::init_pool("sqlite::memory:")
            .await
            .expect("db init");
        migrations::run_migrations(&db).await.expect("migrations");
        let mut conn = db.acquire().await.expect("conn");

        assert!(read_setting(&mut conn, SERVER_GLOBAL_CONFIG)
            .await
            .expect("read")
            .is_empty());

        update_setting(&mut conn, SERVER_GLOBAL_CONFIG, b"{\"a\":1}")
            .await
            .expect("insert");
        update_setting(&mut conn, SERVER_GLOBAL_CONFIG, b"{\"a\":2}")
            .await
            .expect("update");
        assert_eq!(
            read_setting(&mut conn, SERVER_GLOBAL_CONFIG)
                .await
                .expect("read"),
            b"{\"a\":2}".to_vec()
        );
    }
}
