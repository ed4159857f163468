//! Balance cache reconciler.
//!
//! Keeps the `balance_cache` table aligned with the external ledger so
//! rankings are a single indexed query.
//!
//! # Directionality
//!
//! - **On load** the store is authoritative: if the live balance differs
//!   from the cached one by more than the threshold, the ledger is moved to
//!   the cached value ([`BalanceReconciler::restore_on_load`]).
//! - **At every other time** the ledger is authoritative: its balance is
//!   copied into the cache ([`BalanceReconciler::sync_balance`]).
//!
//! Cache writes are best effort. A stale cache only skews rankings, so
//! failures are logged and never propagated into a save or load.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use usersync_db::RecordStore;
use usersync_types::PlayerKey;

use crate::config::BalanceConfig;
use crate::error::{LedgerError, ReconcileError};

/// The external economy provider, keyed by the same player key as the
/// stores. Calls are synchronous and must only be made from the host
/// context.
pub trait Ledger: Send + Sync {
    /// Current balance of `key`.
    fn balance(&self, key: PlayerKey) -> Result<Decimal, LedgerError>;

    /// Add `amount` to `key`'s balance.
    fn deposit(&self, key: PlayerKey, amount: Decimal) -> Result<(), LedgerError>;

    /// Remove `amount` from `key`'s balance.
    fn withdraw(&self, key: PlayerKey, amount: Decimal) -> Result<(), LedgerError>;
}

/// In-process ledger. Unknown accounts start at zero.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: Mutex<HashMap<PlayerKey, Decimal>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the balance of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] if the account table is poisoned.
    pub fn set_balance(&self, key: PlayerKey, amount: Decimal) -> Result<(), LedgerError> {
        let mut accounts = self.lock()?;
        accounts.insert(key, amount);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<PlayerKey, Decimal>>, LedgerError> {
        self.accounts.lock().map_err(|e| LedgerError::Unavailable {
            message: e.to_string(),
        })
    }
}

impl Ledger for MemoryLedger {
    fn balance(&self, key: PlayerKey) -> Result<Decimal, LedgerError> {
        Ok(self.lock()?.get(&key).copied().unwrap_or(Decimal::ZERO))
    }

    fn deposit(&self, key: PlayerKey, amount: Decimal) -> Result<(), LedgerError> {
        if amount.is_sign_negative() {
            return Err(LedgerError::NegativeAmount { amount });
        }
        let mut accounts = self.lock()?;
        let balance = accounts.entry(key).or_insert(Decimal::ZERO);
        *balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { key })?;
        Ok(())
    }

    fn withdraw(&self, key: PlayerKey, amount: Decimal) -> Result<(), LedgerError> {
        if amount.is_sign_negative() {
            return Err(LedgerError::NegativeAmount { amount });
        }
        let mut accounts = self.lock()?;
        let balance = accounts.entry(key).or_insert(Decimal::ZERO);
        if *balance < amount {
            return Err(LedgerError::InsufficientFunds {
                key,
                balance: *balance,
                requested: amount,
            });
        }
        *balance = balance
            .checked_sub(amount)
            .ok_or(LedgerError::Overflow { key })?;
        Ok(())
    }
}

/// Result of [`BalanceReconciler::restore_on_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The balance cache is turned off.
    Disabled,
    /// No cache row existed; one was written from the ledger.
    Seeded {
        /// The ledger balance that was cached.
        balance: Decimal,
    },
    /// The ledger was moved to the cached value.
    Restored {
        /// Live balance before the restore.
        from: Decimal,
        /// Cached balance the ledger now holds.
        to: Decimal,
    },
    /// Ledger and cache agree within the threshold.
    InAgreement {
        /// The live balance.
        balance: Decimal,
    },
}

/// Aligns the balance cache with the ledger.
#[derive(Clone)]
pub struct BalanceReconciler {
    store: RecordStore,
    ledger: Arc<dyn Ledger>,
    threshold: Decimal,
    enabled: bool,
}

impl std::fmt::Debug for BalanceReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceReconciler")
            .field("store", &self.store.backend())
            .field("threshold", &self.threshold)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl BalanceReconciler {
    /// Create an enabled reconciler.
    pub fn new(store: RecordStore, ledger: Arc<dyn Ledger>, threshold: Decimal) -> Self {
        Self {
            store,
            ledger,
            threshold: threshold.abs(),
            enabled: true,
        }
    }

    /// Create a reconciler from the `balance` config section.
    pub fn from_config(store: RecordStore, ledger: Arc<dyn Ledger>, config: &BalanceConfig) -> Self {
        let mut reconciler = Self::new(store, ledger, config.reconcile_threshold);
        reconciler.enabled = config.enabled;
        reconciler
    }

    /// Whether the balance cache is maintained at all.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Copy the live ledger balance into the cache.
    ///
    /// Returns the cached balance, or `None` if the cache is disabled or
    /// the read or write failed (logged).
    pub async fn sync_balance(&self, key: PlayerKey, name: &str) -> Option<Decimal> {
        if !self.enabled {
            return None;
        }
        let balance = match self.ledger.balance(key) {
            Ok(balance) => balance,
            Err(err) => {
                tracing::warn!(%key, name, error = %err, "Could not read ledger balance");
                return None;
            }
        };
        match self.store.upsert_balance(key, name, balance).await {
            Ok(()) => {
                tracing::debug!(%key, name, %balance, "Synced balance cache");
                Some(balance)
            }
            Err(err) => {
                tracing::warn!(%key, name, error = %err, "Could not update balance cache");
                None
            }
        }
    }

    /// Apply the store-authoritative rule after a load.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] if the cache lookup or write fails, or the
    /// ledger refuses the adjustment.
    pub async fn restore_on_load(&self, key: PlayerKey, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        if !self.enabled {
            return Ok(ReconcileOutcome::Disabled);
        }
        let live = self.ledger.balance(key)?;
        let Some(cached) = self.store.get_balance(key).await? else {
            self.store.upsert_balance(key, name, live).await?;
            tracing::debug!(%key, name, balance = %live, "Seeded balance cache");
            return Ok(ReconcileOutcome::Seeded { balance: live });
        };
        let cached = cached.balance;

        let exceeds = live
            .checked_sub(cached)
            .is_none_or(|diff| diff.abs() > self.threshold);
        if !exceeds {
            return Ok(ReconcileOutcome::InAgreement { balance: live });
        }

        if cached > live {
            let delta = cached.checked_sub(live).ok_or(LedgerError::Overflow { key })?;
            self.ledger.deposit(key, delta)?;
        } else {
            let delta = live.checked_sub(cached).ok_or(LedgerError::Overflow { key })?;
            self.ledger.withdraw(key, delta)?;
        }
        self.store.upsert_balance(key, name, cached).await?;

        tracing::info!(%key, name, from = %live, to = %cached, "Restored balance from store");
        Ok(ReconcileOutcome::Restored { from: live, to: cached })
    }

    /// Sync every player in `players`. Returns how many cache rows were
    /// written.
    pub async fn resync_all(&self, players: &[(PlayerKey, String)]) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut written: usize = 0;
        for (key, name) in players {
            if self.sync_balance(*key, name).await.is_some() {
                written = written.saturating_add(1);
            }
        }
        tracing::info!(players = players.len(), written, "Balance resync finished");
        written
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn memory_ledger_rejects_overdraft_and_negative_amounts() {
        let ledger = MemoryLedger::new();
        let key = PlayerKey::new();
        ledger.deposit(key, Decimal::from(10)).unwrap();
        assert!(matches!(
            ledger.withdraw(key, Decimal::from(11)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            ledger.deposit(key, Decimal::from(-1)),
            Err(LedgerError::NegativeAmount { .. })
        ));
        ledger.withdraw(key, Decimal::from(4)).unwrap();
        assert_eq!(ledger.balance(key).unwrap(), Decimal::from(6));
    }

    #[test]
    fn unknown_account_has_zero_balance() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.balance(PlayerKey::new()).unwrap(), Decimal::ZERO);
    }
}
