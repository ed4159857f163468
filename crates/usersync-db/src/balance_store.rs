//! Operations on the `balance_cache` table.
//!
//! The cache mirrors the external ledger so rankings can be served with a
//! single indexed query. Staleness is tolerated: callers on the save/load
//! path log failures here instead of propagating them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use usersync_types::PlayerKey;
use uuid::Uuid;

use crate::error::StoreError;

/// Scale of the `balance` column (`NUMERIC(20, 2)`).
pub const BALANCE_SCALE: u32 = 2;

/// Operations on the `balance_cache` table.
pub struct BalanceCacheStore<'a> {
    pool: &'a PgPool,
}

impl<'a> BalanceCacheStore<'a> {
    /// Create a new balance cache store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update the cached balance for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the statement fails.
    pub async fn upsert(&self, key: PlayerKey, name: &str, balance: Decimal) -> Result<(), StoreError> {
        let balance = balance.round_dp(BALANCE_SCALE);
        sqlx::query(
            r"INSERT INTO balance_cache (player_key, player_name, balance)
              VALUES ($1, $2, $3)
              ON CONFLICT (player_key) DO UPDATE SET
                player_name = EXCLUDED.player_name,
                balance = EXCLUDED.balance,
                last_updated = now()",
        )
        .bind(key.into_inner())
        .bind(name)
        .bind(balance)
        .execute(self.pool)
        .await
        .map_err(StoreError::query("upsert balance cache"))?;

        tracing::debug!(%key, name, %balance, "Updated balance cache");
        Ok(())
    }

    /// Cached balance for a single key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the query fails.
    pub async fn get(&self, key: PlayerKey) -> Result<Option<BalanceEntry>, StoreError> {
        sqlx::query_as::<_, BalanceEntry>(
            r"SELECT player_key, player_name, balance, last_updated
              FROM balance_cache
              WHERE player_key = $1",
        )
        .bind(key.into_inner())
        .fetch_optional(self.pool)
        .await
        .map_err(StoreError::query("load balance cache entry"))
    }

    /// Highest balances first, at most `limit` rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the query fails.
    pub async fn top(&self, limit: u32) -> Result<Vec<BalanceEntry>, StoreError> {
        sqlx::query_as::<_, BalanceEntry>(
            r"SELECT player_key, player_name, balance, last_updated
              FROM balance_cache
              ORDER BY balance DESC
              LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool)
        .await
        .map_err(StoreError::query("load top balances"))
    }
}

/// A row from the `balance_cache` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BalanceEntry {
    /// Player key.
    pub player_key: Uuid,
    /// Display name at the time of the last sync.
    pub player_name: String,
    /// Cached balance.
    pub balance: Decimal,
    /// When the row was last written.
    pub last_updated: DateTime<Utc>,
}

impl BalanceEntry {
    /// The row's key as a [`PlayerKey`].
    pub const fn key(&self) -> PlayerKey {
        PlayerKey(self.player_key)
    }
}
