//! In-process store backend.
//!
//! Mirrors the `PostgreSQL` tables closely enough for the sync engine to be
//! exercised without a database: upsert semantics, case-insensitive name
//! lookup, strict inactivity cutoff and stable descending balance order all
//! match the SQL. [`MemoryStore::set_offline`] makes every call fail with
//! [`StoreError::Unavailable`] so error paths can be driven deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt as _;
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use usersync_types::PlayerKey;

use crate::balance_store::{BALANCE_SCALE, BalanceEntry};
use crate::error::StoreError;
use crate::record_store::PlayerRecordRow;
use crate::shop_store::ShopTransactionRow;

#[derive(Debug, Default)]
struct Tables {
    records: Vec<PlayerRecordRow>,
    balances: Vec<BalanceEntry>,
    shop: Vec<ShopTransactionRow>,
    next_shop_id: i64,
}

/// Shared in-memory tables. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the database.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Insert a row with an explicit `last_seen`, bypassing upsert rules.
    pub async fn seed_record(&self, key: PlayerKey, name: &str, payload: &str, last_seen: DateTime<Utc>) {
        let mut tables = self.tables.lock().await;
        tables.records.retain(|row| row.player_key != key.into_inner());
        tables.records.push(PlayerRecordRow {
            player_key: key.into_inner(),
            player_name: name.to_owned(),
            payload: payload.to_owned(),
            last_seen,
            created_at: last_seen,
        });
    }

    fn ensure_online(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable { operation });
        }
        Ok(())
    }

    /// See [`PlayerRecordStore::upsert`](crate::PlayerRecordStore::upsert).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn upsert_record(&self, key: PlayerKey, name: &str, payload: &str) -> Result<bool, StoreError> {
        self.ensure_online("upsert player record")?;
        let now = Utc::now();
        let mut tables = self.tables.lock().await;
        if let Some(row) = tables.records.iter_mut().find(|row| row.player_key == key.into_inner()) {
            name.clone_into(&mut row.player_name);
            payload.clone_into(&mut row.payload);
            row.last_seen = row.last_seen.max(now);
        } else {
            tables.records.push(PlayerRecordRow {
                player_key: key.into_inner(),
                player_name: name.to_owned(),
                payload: payload.to_owned(),
                last_seen: now,
                created_at: now,
            });
        }
        Ok(true)
    }

    /// Stored payload for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn record_payload(&self, key: PlayerKey) -> Result<Option<String>, StoreError> {
        Ok(self.record_row(key).await?.map(|row| row.payload))
    }

    /// Full row for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn record_row(&self, key: PlayerKey) -> Result<Option<PlayerRecordRow>, StoreError> {
        self.ensure_online("load player record")?;
        let tables = self.tables.lock().await;
        Ok(tables
            .records
            .iter()
            .find(|row| row.player_key == key.into_inner())
            .cloned())
    }

    /// Most recently seen row whose name matches case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn find_record_by_name(&self, name: &str) -> Result<Option<PlayerRecordRow>, StoreError> {
        self.ensure_online("find player record by name")?;
        let wanted = name.to_lowercase();
        let tables = self.tables.lock().await;
        Ok(tables
            .records
            .iter()
            .filter(|row| row.player_name.to_lowercase() == wanted)
            .max_by_key(|row| row.last_seen)
            .cloned())
    }

    /// Remove the row for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn delete_record(&self, key: PlayerKey) -> Result<bool, StoreError> {
        self.ensure_online("delete player record")?;
        let mut tables = self.tables.lock().await;
        let before = tables.records.len();
        tables.records.retain(|row| row.player_key != key.into_inner());
        Ok(tables.records.len() < before)
    }

    /// Snapshot of every row in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn list_records(&self) -> Result<Vec<PlayerRecordRow>, StoreError> {
        self.ensure_online("scan player records")?;
        Ok(self.tables.lock().await.records.clone())
    }

    /// Every row as a stream. The rows are snapshotted when called.
    pub async fn stream_records(&self) -> BoxStream<'static, Result<PlayerRecordRow, StoreError>> {
        match self.list_records().await {
            Ok(rows) => futures::stream::iter(rows.into_iter().map(Ok)).boxed(),
            Err(err) => futures::stream::once(async move { Err(err) }).boxed(),
        }
    }

    /// Number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn count_records(&self) -> Result<u64, StoreError> {
        self.ensure_online("count player records")?;
        let len = self.tables.lock().await.records.len();
        Ok(u64::try_from(len).unwrap_or(u64::MAX))
    }

    /// Remove rows whose `last_seen` is strictly before `now - days`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn delete_inactive(&self, days: u32) -> Result<u64, StoreError> {
        self.ensure_online("delete inactive player records")?;
        let Some(cutoff) = TimeDelta::try_days(i64::from(days))
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
        else {
            return Ok(0);
        };
        let mut tables = self.tables.lock().await;
        let before = tables.records.len();
        tables.records.retain(|row| row.last_seen >= cutoff);
        let removed = before.saturating_sub(tables.records.len());
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    /// Insert or replace the cached balance for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn upsert_balance(&self, key: PlayerKey, name: &str, balance: Decimal) -> Result<(), StoreError> {
        self.ensure_online("upsert balance cache")?;
        let balance = balance.round_dp(BALANCE_SCALE);
        let now = Utc::now();
        let mut tables = self.tables.lock().await;
        if let Some(entry) = tables.balances.iter_mut().find(|e| e.player_key == key.into_inner()) {
            name.clone_into(&mut entry.player_name);
            entry.balance = balance;
            entry.last_updated = now;
        } else {
            tables.balances.push(BalanceEntry {
                player_key: key.into_inner(),
                player_name: name.to_owned(),
                balance,
                last_updated: now,
            });
        }
        Ok(())
    }

    /// Cached balance for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn balance(&self, key: PlayerKey) -> Result<Option<BalanceEntry>, StoreError> {
        self.ensure_online("load balance cache entry")?;
        let tables = self.tables.lock().await;
        Ok(tables
            .balances
            .iter()
            .find(|e| e.player_key == key.into_inner())
            .cloned())
    }

    /// Highest balances first. Ties keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn top_balances(&self, limit: u32) -> Result<Vec<BalanceEntry>, StoreError> {
        self.ensure_online("load top balances")?;
        let mut entries = self.tables.lock().await.balances.clone();
        entries.sort_by(|a, b| b.balance.cmp(&a.balance));
        entries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(entries)
    }

    /// Append a shop transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn insert_shop_transaction(
        &self,
        key: PlayerKey,
        source: &str,
        payload: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        self.ensure_online("insert shop transaction")?;
        let mut tables = self.tables.lock().await;
        tables.next_shop_id = tables.next_shop_id.saturating_add(1);
        let id = tables.next_shop_id;
        tables.shop.push(ShopTransactionRow {
            id,
            player_key: key.into_inner(),
            source: source.to_owned(),
            payload: payload.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    /// Shop transactions for `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] while offline.
    pub async fn shop_transactions(&self, key: PlayerKey) -> Result<Vec<ShopTransactionRow>, StoreError> {
        self.ensure_online("load shop transactions")?;
        let tables = self.tables.lock().await;
        Ok(tables
            .shop
            .iter()
            .filter(|row| row.player_key == key.into_inner())
            .cloned()
            .collect())
    }

    /// `false` while [`set_offline`](Self::set_offline) is in effect.
    pub fn is_connected(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
