//! Backend-agnostic store handle.
//!
//! The sync engine, reconciler and command layer only ever talk to a
//! [`RecordStore`]. Every call is independent: no transaction spans two
//! calls, and a failed call leaves nothing half-written.

use futures::stream::BoxStream;
use rust_decimal::Decimal;
use usersync_types::PlayerKey;

use crate::balance_store::{BalanceCacheStore, BalanceEntry};
use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::postgres::PostgresPool;
use crate::record_store::{PlayerRecordRow, PlayerRecordStore};
use crate::shop_store::{ShopTransactionRow, ShopTransactionStore};

/// A handle to the relational store. Cheap to clone.
#[derive(Debug, Clone)]
pub enum RecordStore {
    /// `PostgreSQL`-backed store.
    Postgres(PostgresPool),
    /// In-process store.
    Memory(MemoryStore),
}

impl RecordStore {
    /// Short backend name for status output.
    pub const fn backend(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    /// Insert or replace the record for `key`. Returns `true` when a row
    /// was written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn upsert_record(&self, key: PlayerKey, name: &str, payload: &str) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(pg) => PlayerRecordStore::new(pg.pool()).upsert(key, name, payload).await,
            Self::Memory(mem) => mem.upsert_record(key, name, payload).await,
        }
    }

    /// Stored payload for `key`. `Ok(None)` means no row exists, which is
    /// distinct from a failed lookup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    pub async fn get_record(&self, key: PlayerKey) -> Result<Option<String>, StoreError> {
        match self {
            Self::Postgres(pg) => PlayerRecordStore::new(pg.pool()).payload(key).await,
            Self::Memory(mem) => mem.record_payload(key).await,
        }
    }

    /// Full row for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    pub async fn get_record_row(&self, key: PlayerKey) -> Result<Option<PlayerRecordRow>, StoreError> {
        match self {
            Self::Postgres(pg) => PlayerRecordStore::new(pg.pool()).row(key).await,
            Self::Memory(mem) => mem.record_row(key).await,
        }
    }

    /// Most recently seen row with a matching display name, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    pub async fn find_record_by_name(&self, name: &str) -> Result<Option<PlayerRecordRow>, StoreError> {
        match self {
            Self::Postgres(pg) => PlayerRecordStore::new(pg.pool()).find_by_name(name).await,
            Self::Memory(mem) => mem.find_record_by_name(name).await,
        }
    }

    /// Remove the row for `key`. Returns whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub async fn delete_record(&self, key: PlayerKey) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(pg) => PlayerRecordStore::new(pg.pool()).delete(key).await,
            Self::Memory(mem) => mem.delete_record(key).await,
        }
    }

    /// Every row, collected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the scan fails.
    pub async fn list_all_records(&self) -> Result<Vec<PlayerRecordRow>, StoreError> {
        match self {
            Self::Postgres(pg) => PlayerRecordStore::new(pg.pool()).list_all().await,
            Self::Memory(mem) => mem.list_records().await,
        }
    }

    /// Every row, streamed. Errors surface as stream items.
    pub async fn stream_records(&self) -> BoxStream<'_, Result<PlayerRecordRow, StoreError>> {
        match self {
            Self::Postgres(pg) => PlayerRecordStore::new(pg.pool()).stream_all(),
            Self::Memory(mem) => mem.stream_records().await,
        }
    }

    /// Number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn count_records(&self) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(pg) => PlayerRecordStore::new(pg.pool()).count().await,
            Self::Memory(mem) => mem.count_records().await,
        }
    }

    /// Remove rows last seen strictly more than `days` days ago.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub async fn delete_inactive(&self, days: u32) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(pg) => PlayerRecordStore::new(pg.pool()).delete_inactive(days).await,
            Self::Memory(mem) => mem.delete_inactive(days).await,
        }
    }

    /// Insert or replace a cached balance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn upsert_balance(&self, key: PlayerKey, name: &str, balance: Decimal) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pg) => BalanceCacheStore::new(pg.pool()).upsert(key, name, balance).await,
            Self::Memory(mem) => mem.upsert_balance(key, name, balance).await,
        }
    }

    /// Cached balance for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    pub async fn get_balance(&self, key: PlayerKey) -> Result<Option<BalanceEntry>, StoreError> {
        match self {
            Self::Postgres(pg) => BalanceCacheStore::new(pg.pool()).get(key).await,
            Self::Memory(mem) => mem.balance(key).await,
        }
    }

    /// Highest cached balances first, at most `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn top_balances(&self, limit: u32) -> Result<Vec<BalanceEntry>, StoreError> {
        match self {
            Self::Postgres(pg) => BalanceCacheStore::new(pg.pool()).top(limit).await,
            Self::Memory(mem) => mem.top_balances(limit).await,
        }
    }

    /// Append a shop transaction and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub async fn insert_shop_transaction(
        &self,
        key: PlayerKey,
        source: &str,
        payload: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        match self {
            Self::Postgres(pg) => ShopTransactionStore::new(pg.pool()).insert(key, source, payload).await,
            Self::Memory(mem) => mem.insert_shop_transaction(key, source, payload).await,
        }
    }

    /// Shop transactions recorded for `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn shop_transactions(&self, key: PlayerKey) -> Result<Vec<ShopTransactionRow>, StoreError> {
        match self {
            Self::Postgres(pg) => ShopTransactionStore::new(pg.pool()).for_player(key).await,
            Self::Memory(mem) => mem.shop_transactions(key).await,
        }
    }

    /// Liveness probe.
    pub async fn is_connected(&self) -> bool {
        match self {
            Self::Postgres(pg) => pg.is_connected().await,
            Self::Memory(mem) => mem.is_connected(),
        }
    }

    /// Release backend resources.
    pub async fn close(&self) {
        if let Self::Postgres(pg) = self {
            pg.close().await;
        }
    }
}

impl From<PostgresPool> for RecordStore {
    fn from(pool: PostgresPool) -> Self {
        Self::Postgres(pool)
    }
}

impl From<MemoryStore> for RecordStore {
    fn from(store: MemoryStore) -> Self {
        Self::Memory(store)
    }
}
