use super::schema::Database;
use super::types::{DatabaseError, StoredSession};

/// Storage key for the opaque bearer token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Storage key for the serialized user record.
pub const USER_KEY: &str = "user";

impl Database {
    // ========================================================================
    // Persisted Session Operations
    // ========================================================================

    /// Read both auth entries in one go.
    pub async fn load_session(&self) -> Result<StoredSession, DatabaseError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM session_state WHERE key IN (?, ?)")
                .bind(ACCESS_TOKEN_KEY)
                .bind(USER_KEY)
                .fetch_all(&self.pool)
                .await?;

        let mut stored = StoredSession::default();
        for (key, value) in rows {
            match key.as_str() {
                ACCESS_TOKEN_KEY => stored.access_token = Some(value),
                USER_KEY => stored.user = Some(value),
                _ => {}
            }
        }
        Ok(stored)
    }

    /// Persist the token and user record together.
    ///
    /// Both rows are written in a single transaction so a crash can never leave
    /// a token without its user (or the reverse).
    pub async fn save_session(
        &self,
        access_token: &str,
        user_json: &str,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        upsert(&mut tx, ACCESS_TOKEN_KEY, access_token).await?;
        upsert(&mut tx, USER_KEY, user_json).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Overwrite only the token (refresh path).
    pub async fn save_access_token(&self, access_token: &str) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        upsert(&mut tx, ACCESS_TOKEN_KEY, access_token).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove every persisted auth entry.
    ///
    /// Clears the whole table rather than the two known keys, so stale entries
    /// from older layouts cannot survive a logout.
    pub async fn clear_session(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM session_state")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn upsert(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    key: &str,
    value: &str,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO session_state (key, value, updated_at)
        VALUES (?, ?, datetime('now'))
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
    "#,
    )
    .bind(key)
    .bind(value)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
