//! Relational store adapter for usersync.
//!
//! Holds one row per player record plus a cached balance table used for
//! rankings and an append-only shop transaction log. The sync engine talks
//! to the store exclusively through [`RecordStore`], which dispatches to
//! either the `PostgreSQL` backend or the in-process [`MemoryStore`].
//!
//! # Architecture
//!
//! ```text
//! SyncEngine / BalanceReconciler / commands
//!     |
//!     +-- RecordStore
//!         |-- Postgres(PostgresPool)
//!         |     |-- PlayerRecordStore     (player_records)
//!         |     |-- BalanceCacheStore     (balance_cache)
//!         |     +-- ShopTransactionStore  (shop_transactions)
//!         +-- Memory(MemoryStore)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool, configuration and schema
//! - [`record_store`] -- Player record upsert, lookup, scan and cleanup
//! - [`balance_store`] -- Balance cache upsert and top-N ranking
//! - [`shop_store`] -- Shop transaction log
//! - [`memory`] -- In-process backend
//! - [`store`] -- Backend dispatch
//! - [`error`] -- Shared error types

pub mod balance_store;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod record_store;
pub mod shop_store;
pub mod store;

// Re-export primary types for convenience.
pub use balance_store::{BalanceCacheStore, BalanceEntry};
pub use error::{StoreError, StoreInitError};
pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use record_store::{PlayerRecordRow, PlayerRecordStore};
pub use shop_store::{ShopTransactionRow, ShopTransactionStore};
pub use store::RecordStore;
