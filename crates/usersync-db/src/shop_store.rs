//! Append-only shop transaction log.
//!
//! Shop integrations record offline sales and buy orders here so they can be
//! settled when the player next joins. The payload is opaque JSON.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use usersync_types::PlayerKey;
use uuid::Uuid;

use crate::error::StoreError;

/// Operations on the `shop_transactions` table.
pub struct ShopTransactionStore<'a> {
    pool: &'a PgPool,
}

impl<'a> ShopTransactionStore<'a> {
    /// Create a new shop transaction store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append a transaction and return its generated id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the insert fails.
    pub async fn insert(
        &self,
        key: PlayerKey,
        source: &str,
        payload: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            r"INSERT INTO shop_transactions (player_key, source, payload)
              VALUES ($1, $2, $3)
              RETURNING id",
        )
        .bind(key.into_inner())
        .bind(source)
        .bind(payload)
        .fetch_one(self.pool)
        .await
        .map_err(StoreError::query("insert shop transaction"))?;

        tracing::debug!(%key, source, id, "Recorded shop transaction");
        Ok(id)
    }

    /// All transactions recorded for `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the query fails.
    pub async fn for_player(&self, key: PlayerKey) -> Result<Vec<ShopTransactionRow>, StoreError> {
        sqlx::query_as::<_, ShopTransactionRow>(
            r"SELECT id, player_key, source, payload, created_at
              FROM shop_transactions
              WHERE player_key = $1
              ORDER BY id",
        )
        .bind(key.into_inner())
        .fetch_all(self.pool)
        .await
        .map_err(StoreError::query("load shop transactions"))
    }
}

/// A row from the `shop_transactions` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ShopTransactionRow {
    /// Generated id.
    pub id: i64,
    /// Player the transaction belongs to.
    pub player_key: Uuid,
    /// Name of the integration that produced it.
    pub source: String,
    /// Opaque transaction payload.
    pub payload: serde_json::Value,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}
