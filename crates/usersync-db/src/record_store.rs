//! Operations on the `player_records` table.
//!
//! One row per player key. The payload column holds the flat-file content
//! exactly as the sync engine produced it (possibly `GZIP:`-tagged); this
//! layer never inspects it.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{StreamExt as _, TryStreamExt as _};
use sqlx::PgPool;
use usersync_types::PlayerKey;
use uuid::Uuid;

use crate::error::StoreError;

/// Operations on the `player_records` table.
pub struct PlayerRecordStore<'a> {
    pool: &'a PgPool,
}

impl<'a> PlayerRecordStore<'a> {
    /// Create a new record store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update the record for `key` in a single statement.
    ///
    /// On conflict the name and payload are replaced and `last_seen` is
    /// bumped, never moved backwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the statement fails.
    pub async fn upsert(&self, key: PlayerKey, name: &str, payload: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"INSERT INTO player_records (player_key, player_name, payload)
              VALUES ($1, $2, $3)
              ON CONFLICT (player_key) DO UPDATE SET
                player_name = EXCLUDED.player_name,
                payload = EXCLUDED.payload,
                last_seen = GREATEST(player_records.last_seen, now())",
        )
        .bind(key.into_inner())
        .bind(name)
        .bind(payload)
        .execute(self.pool)
        .await
        .map_err(StoreError::query("upsert player record"))?;

        let affected = result.rows_affected();
        tracing::debug!(%key, name, bytes = payload.len(), affected, "Upserted player record");
        Ok(affected > 0)
    }

    /// Fetch the stored payload for `key`, or `None` for an unknown key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the query fails.
    pub async fn payload(&self, key: PlayerKey) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>(r"SELECT payload FROM player_records WHERE player_key = $1")
            .bind(key.into_inner())
            .fetch_optional(self.pool)
            .await
            .map_err(StoreError::query("load player record"))
    }

    /// Fetch the full row for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the query fails.
    pub async fn row(&self, key: PlayerKey) -> Result<Option<PlayerRecordRow>, StoreError> {
        sqlx::query_as::<_, PlayerRecordRow>(
            r"SELECT player_key, player_name, payload, last_seen, created_at
              FROM player_records
              WHERE player_key = $1",
        )
        .bind(key.into_inner())
        .fetch_optional(self.pool)
        .await
        .map_err(StoreError::query("load player record row"))
    }

    /// Find the most recently seen row whose display name matches `name`
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the query fails.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<PlayerRecordRow>, StoreError> {
        sqlx::query_as::<_, PlayerRecordRow>(
            r"SELECT player_key, player_name, payload, last_seen, created_at
              FROM player_records
              WHERE lower(player_name) = lower($1)
              ORDER BY last_seen DESC
              LIMIT 1",
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await
        .map_err(StoreError::query("find player record by name"))
    }

    /// Delete the record for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the statement fails.
    pub async fn delete(&self, key: PlayerKey) -> Result<bool, StoreError> {
        let result = sqlx::query(r"DELETE FROM player_records WHERE player_key = $1")
            .bind(key.into_inner())
            .execute(self.pool)
            .await
            .map_err(StoreError::query("delete player record"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Stream every row without buffering the whole table.
    pub fn stream_all(&self) -> BoxStream<'a, Result<PlayerRecordRow, StoreError>> {
        sqlx::query_as::<_, PlayerRecordRow>(
            r"SELECT player_key, player_name, payload, last_seen, created_at
              FROM player_records
              ORDER BY id",
        )
        .fetch(self.pool)
        .map_err(StoreError::query("scan player records"))
        .boxed()
    }

    /// Collect every row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the scan fails part-way.
    pub async fn list_all(&self) -> Result<Vec<PlayerRecordRow>, StoreError> {
        self.stream_all().try_collect().await
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the query fails.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(r"SELECT COUNT(*) FROM player_records")
            .fetch_one(self.pool)
            .await
            .map_err(StoreError::query("count player records"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Delete every record whose `last_seen` is strictly older than
    /// `days` days before now. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the statement fails.
    pub async fn delete_inactive(&self, days: u32) -> Result<u64, StoreError> {
        let days_i32 = i32::try_from(days).unwrap_or(i32::MAX);
        let result = sqlx::query(
            r"DELETE FROM player_records
              WHERE last_seen < now() - make_interval(days => $1)",
        )
        .bind(days_i32)
        .execute(self.pool)
        .await
        .map_err(StoreError::query("delete inactive player records"))?;

        let removed = result.rows_affected();
        tracing::info!(days, removed, "Removed inactive player records");
        Ok(removed)
    }
}

/// A row from the `player_records` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PlayerRecordRow {
    /// Player key.
    pub player_key: Uuid,
    /// Last known display name.
    pub player_name: String,
    /// Stored payload, possibly `GZIP:`-tagged.
    pub payload: String,
    /// Last time the record was saved.
    pub last_seen: DateTime<Utc>,
    /// First time the record was saved.
    pub created_at: DateTime<Utc>,
}

impl PlayerRecordRow {
    /// The row's key as a [`PlayerKey`].
    pub const fn key(&self) -> PlayerKey {
        PlayerKey(self.player_key)
    }
}
