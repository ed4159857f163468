//! End-to-end presence flows: listener, worker pool and host context.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tempfile::TempDir;
use tokio::sync::mpsc;
use usersync_core::codec;
use usersync_core::{
    BalanceReconciler, HostContext, HostStats, Ledger, MemoryLedger, PresenceEvent, PresenceListener,
    PresenceSettings, Roster, SyncEngine, SyncSettings, UserdataDir, WorkerPool,
};
use usersync_db::{MemoryStore, RecordStore};
use usersync_types::PlayerKey;

const RECORD: &str = "lastAccountName: Alex\nmoney: 10\nhomes:\n  base: {}\n";

struct Harness {
    _tmp: TempDir,
    mem: MemoryStore,
    ledger: Arc<MemoryLedger>,
    engine: Arc<SyncEngine>,
    roster: Roster,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mem = MemoryStore::new();
        let engine = SyncEngine::new(
            RecordStore::from(mem.clone()),
            UserdataDir::new(tmp.path()),
            SyncSettings::default(),
        );
        Self {
            _tmp: tmp,
            mem,
            ledger: Arc::new(MemoryLedger::new()),
            engine: Arc::new(engine),
            roster: Roster::new(),
        }
    }

    /// Feed `events` through a listener and host context, then wait for
    /// both to drain.
    async fn run(&self, settings: PresenceSettings, events: Vec<PresenceEvent>) -> HostStats {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (notice_tx, notice_rx) = mpsc::channel(16);

        let reconciler = BalanceReconciler::new(
            RecordStore::from(self.mem.clone()),
            Arc::clone(&self.ledger) as Arc<dyn Ledger>,
            Decimal::new(1, 2),
        );
        let host = tokio::spawn(HostContext::new(reconciler, self.roster.clone()).run(notice_rx));
        let listener = PresenceListener::new(
            Arc::clone(&self.engine),
            WorkerPool::new(2),
            self.roster.clone(),
            notice_tx,
            settings,
        );

        for event in events {
            event_tx.send(event).await.unwrap();
        }
        drop(event_tx);
        listener.run(event_rx).await;
        host.await.unwrap()
    }
}

fn settings() -> PresenceSettings {
    PresenceSettings {
        load_on_join: true,
        save_on_quit: true,
        post_load_delay: Duration::ZERO,
        balance_signal_delay: Duration::ZERO,
    }
}

fn joined(key: PlayerKey) -> PresenceEvent {
    PresenceEvent::Joined {
        key,
        name: "Alex".to_owned(),
    }
}

fn left(key: PlayerKey) -> PresenceEvent {
    PresenceEvent::Left {
        key,
        name: "Alex".to_owned(),
    }
}

#[tokio::test]
async fn join_loads_record_and_restores_balance() {
    let h = Harness::new();
    let key = PlayerKey::new();
    h.mem
        .seed_record(key, "Alex", &codec::compress(RECORD).unwrap(), Utc::now())
        .await;
    h.mem.upsert_balance(key, "Alex", Decimal::from(250)).await.unwrap();

    let stats = h.run(settings(), vec![joined(key)]).await;

    assert_eq!(h.engine.userdata().read(key).await.unwrap().as_deref(), Some(RECORD));
    assert_eq!(h.ledger.balance(key).unwrap(), Decimal::from(250));
    assert_eq!(stats.restored, 1);
    assert_eq!(h.roster.name_of(key).await.as_deref(), Some("Alex"));
}

#[tokio::test]
async fn join_without_stored_record_seeds_balance_cache() {
    let h = Harness::new();
    let key = PlayerKey::new();
    h.ledger.set_balance(key, Decimal::from(5)).unwrap();

    let stats = h.run(settings(), vec![joined(key)]).await;

    assert_eq!(h.engine.userdata().read(key).await.unwrap(), None);
    assert_eq!(stats.balances_synced, 1);
    assert_eq!(h.mem.balance(key).await.unwrap().unwrap().balance, Decimal::from(5));
}

#[tokio::test]
async fn join_with_loading_disabled_only_updates_roster() {
    let h = Harness::new();
    let key = PlayerKey::new();
    h.mem.seed_record(key, "Alex", RECORD, Utc::now()).await;

    let stats = h
        .run(
            PresenceSettings {
                load_on_join: false,
                ..settings()
            },
            vec![joined(key)],
        )
        .await;

    assert_eq!(h.engine.userdata().read(key).await.unwrap(), None);
    assert_eq!(stats.handled, 0);
    assert_eq!(h.roster.len().await, 1);
}

#[tokio::test]
async fn quit_saves_releases_and_syncs_balance() {
    let h = Harness::new();
    let key = PlayerKey::new();
    h.engine.userdata().write(key, RECORD).await.unwrap();
    h.ledger.set_balance(key, Decimal::from(33)).unwrap();
    h.roster.insert(key, "Alex").await;

    let stats = h.run(settings(), vec![left(key)]).await;

    assert!(h.mem.record_payload(key).await.unwrap().is_some());
    assert_eq!(h.engine.userdata().read(key).await.unwrap(), None);
    assert_eq!(h.mem.balance(key).await.unwrap().unwrap().balance, Decimal::from(33));
    assert_eq!(stats.balances_synced, 1);
    assert!(h.roster.is_empty().await);
}

#[tokio::test]
async fn failed_quit_save_keeps_flat_file() {
    let h = Harness::new();
    let key = PlayerKey::new();
    h.engine.userdata().write(key, RECORD).await.unwrap();
    h.mem.set_offline(true);

    let stats = h.run(settings(), vec![left(key)]).await;

    assert_eq!(stats.failures, 1);
    assert_eq!(h.engine.userdata().read(key).await.unwrap().as_deref(), Some(RECORD));
}

#[tokio::test]
async fn balance_change_refreshes_cache() {
    let h = Harness::new();
    let key = PlayerKey::new();
    h.ledger.set_balance(key, Decimal::from(12)).unwrap();

    h.run(
        settings(),
        vec![PresenceEvent::BalanceChanged {
            key,
            name: "Alex".to_owned(),
        }],
    )
    .await;

    assert_eq!(h.mem.balance(key).await.unwrap().unwrap().balance, Decimal::from(12));
}

#[tokio::test]
async fn join_then_quit_round_trips_record() {
    let h = Harness::new();
    let key = PlayerKey::new();
    h.mem.seed_record(key, "Alex", RECORD, Utc::now()).await;

    h.run(settings(), vec![joined(key)]).await;
    h.engine
        .userdata()
        .write(key, "lastAccountName: Alex\nmoney: 11\n")
        .await
        .unwrap();
    h.run(settings(), vec![left(key)]).await;

    let stored = h.mem.record_payload(key).await.unwrap().unwrap();
    assert_eq!(codec::decompress(&stored).unwrap(), "lastAccountName: Alex\nmoney: 11\n");
    assert_eq!(h.engine.userdata().count_records().await.unwrap(), 0);
}
