//! Integration tests for the administrative command layer.

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

use chrono::{TimeDelta, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;
use tokio::sync::mpsc;
use usersync_core::{
    Command, CommandError, CommandRunner, CommandSettings, HostNotice, Roster, SyncEngine, SyncSettings,
    UserdataDir, UsersyncConfig, WorkerPool,
};
use usersync_db::{MemoryStore, RecordStore};
use usersync_types::{PlayerKey, RecordLookup};

struct Harness {
    _tmp: TempDir,
    userdata: UserdataDir,
    mem: MemoryStore,
    roster: Roster,
    runner: CommandRunner,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let mem = MemoryStore::new();
    let userdata = UserdataDir::new(tmp.path().join("userdata"));
    let engine = SyncEngine::new(RecordStore::from(mem.clone()), userdata.clone(), SyncSettings::default());
    let roster = Roster::new();
    let runner = CommandRunner::new(
        Arc::new(engine),
        WorkerPool::new(2),
        roster.clone(),
        CommandSettings::from(&UsersyncConfig::default()),
    );
    Harness {
        _tmp: tmp,
        userdata,
        mem,
        roster,
        runner,
    }
}

async fn write(h: &Harness, key: PlayerKey, content: &str) {
    h.userdata.write(key, content).await.unwrap();
}

#[tokio::test]
async fn import_then_export_reports_counts() {
    let h = harness();
    for i in 0..3 {
        write(&h, PlayerKey::new(), &format!("lastAccountName: P{i}\n")).await;
    }

    let reply = h.runner.execute(Command::Import).await.unwrap();
    assert_eq!(reply.to_string(), "Imported 3 of 3 flat files (0 failed)");

    h.runner.execute(Command::DeleteUserdata).await.unwrap();
    let reply = h.runner.execute(Command::Export).await.unwrap();
    assert_eq!(reply.to_string(), "Exported 3 of 3 stored records (0 failed)");
    assert_eq!(h.userdata.count_records().await.unwrap(), 3);
}

#[tokio::test]
async fn cleanup_defaults_to_configured_days() {
    let h = harness();
    let now = Utc::now();
    h.mem
        .seed_record(PlayerKey::new(), "Old", "a: 1\n", now - TimeDelta::days(400))
        .await;
    h.mem
        .seed_record(PlayerKey::new(), "Mid", "a: 1\n", now - TimeDelta::days(100))
        .await;

    let reply = h.runner.execute(Command::Cleanup { days: None }).await.unwrap();
    assert_eq!(reply.lines, vec!["Removed 1 records inactive for more than 365 days"]);

    let reply = h.runner.execute(Command::Cleanup { days: Some(30) }).await.unwrap();
    assert_eq!(reply.lines, vec!["Removed 1 records inactive for more than 30 days"]);
}

#[tokio::test]
async fn sync_keeps_file_and_force_save_releases_it() {
    let h = harness();
    let key = PlayerKey::new();
    write(&h, key, "lastAccountName: FromFile\n").await;
    h.roster.insert(key, "Online").await;

    let reply = h.runner.execute(Command::Sync { key }).await.unwrap();
    assert_eq!(reply.lines, vec![format!("Synced Online ({key})")]);
    assert!(h.userdata.read(key).await.unwrap().is_some());

    let reply = h.runner.execute(Command::ForceSave { key }).await.unwrap();
    assert_eq!(reply.lines, vec![format!("Saved and released Online ({key})")]);
    assert_eq!(h.userdata.read(key).await.unwrap(), None);

    let row = h.mem.record_row(key).await.unwrap().unwrap();
    assert_eq!(row.player_name, "Online");
}

#[tokio::test]
async fn sync_posts_balance_follow_up() {
    let h = harness();
    let (tx, mut rx) = mpsc::channel(4);
    let runner = h.runner.clone().with_notices(tx);
    let key = PlayerKey::new();
    write(&h, key, "lastAccountName: Alex\n").await;

    runner.execute(Command::Sync { key }).await.unwrap();

    assert_eq!(
        rx.recv().await,
        Some(HostNotice::BalanceDirty {
            key,
            name: "Alex".to_owned()
        })
    );
}

#[tokio::test]
async fn load_of_missing_record_is_not_found() {
    let h = harness();
    let err = h
        .runner
        .execute(Command::Load { key: PlayerKey::new() })
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::NotFound { .. }));
}

#[tokio::test]
async fn status_reports_counts_and_settings() {
    let h = harness();
    h.mem.seed_record(PlayerKey::new(), "A", "a: 1\n", Utc::now()).await;
    write(&h, PlayerKey::new(), "a: 1\n").await;

    let reply = h.runner.execute(Command::Status).await.unwrap();

    assert_eq!(reply.lines[0], "Store: connected (memory)");
    assert!(reply.lines.contains(&"Stored records: 1".to_owned()));
    assert!(reply.lines.contains(&"Flat files: 1".to_owned()));
    assert!(reply.lines.contains(&"Compression: yes".to_owned()));
    assert!(reply.lines.contains(&"Cleanup: disabled".to_owned()));
}

#[tokio::test]
async fn status_survives_offline_store() {
    let h = harness();
    h.mem.set_offline(true);

    let reply = h.runner.execute(Command::Status).await.unwrap();

    assert_eq!(reply.lines[0], "Store: disconnected (memory)");
    assert!(reply.lines.contains(&"Stored records: unavailable".to_owned()));
}

#[tokio::test]
async fn view_record_renders_diagnostics() {
    let h = harness();
    let key = PlayerKey::new();
    write(&h, key, "lastAccountName: Alex\nmoney: 5\n").await;
    h.runner.execute(Command::Sync { key }).await.unwrap();

    let reply = h
        .runner
        .execute(Command::ViewRecord {
            lookup: RecordLookup::parse("Alex"),
        })
        .await
        .unwrap();

    assert_eq!(reply.lines[0], format!("Record Alex ({key})"));
    assert!(reply.lines.contains(&"Compressed: yes".to_owned()));
    assert!(reply.lines.contains(&"Sections: lastAccountName, money".to_owned()));

    let err = h
        .runner
        .execute(Command::ViewRecord {
            lookup: RecordLookup::parse("Nobody"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::NotFound { .. }));
}

#[tokio::test]
async fn balance_top_ranks_highest_first() {
    let h = harness();
    for (name, balance) in [("A", 50), ("B", 200), ("C", 75)] {
        h.mem
            .upsert_balance(PlayerKey::new(), name, Decimal::from(balance))
            .await
            .unwrap();
    }

    let reply = h
        .runner
        .execute(Command::BalanceTop { limit: Some(2) })
        .await
        .unwrap();

    assert_eq!(reply.lines, vec!["Top 2 balances", "1. B - 200.00", "2. C - 75.00"]);
}
