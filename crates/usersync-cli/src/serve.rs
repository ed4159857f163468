//! The presence-driven serve loop.
//!
//! Wires the presence listener, host context, scheduler and command runner
//! together and feeds them from stdin (see [`console`](crate::console)).
//! The ledger is an in-process [`MemoryLedger`]; balances only live as long
//! as the process.
//!
//! Shutdown order on EOF or Ctrl-C: scheduler, presence listener (waits for
//! in-flight saves), host context, optional userdata wipe.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use usersync_core::{
    BalanceReconciler, CommandRunner, CommandSettings, HostContext, Ledger, MemoryLedger, PresenceEvent,
    PresenceListener, PresenceSettings, Roster, Scheduler, SyncEngine, UsersyncConfig, WorkerPool,
};
use usersync_db::RecordStore;

use crate::console::{self, ConsoleCommand};

/// Pending presence events before the console blocks.
const EVENT_BUFFER: usize = 256;

/// Pending host notices before producers block.
const NOTICE_BUFFER: usize = 256;

/// Run until stdin closes or Ctrl-C.
pub(crate) async fn run(
    config: &UsersyncConfig,
    store: &RecordStore,
    engine: Arc<SyncEngine>,
    pool: WorkerPool,
    roster: Roster,
) -> anyhow::Result<()> {
    let ledger = Arc::new(MemoryLedger::new());
    let reconciler =
        BalanceReconciler::from_config(store.clone(), Arc::clone(&ledger) as Arc<dyn Ledger>, &config.balance);

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (notice_tx, notice_rx) = mpsc::channel(NOTICE_BUFFER);

    let host = tokio::spawn(HostContext::new(reconciler, roster.clone()).run(notice_rx));
    let listener = tokio::spawn(
        PresenceListener::new(
            Arc::clone(&engine),
            pool.clone(),
            roster.clone(),
            notice_tx.clone(),
            PresenceSettings::from(&config.settings),
        )
        .run(event_rx),
    );
    let scheduler = Scheduler::start(config, Arc::clone(&engine), pool.clone(), roster.clone(), notice_tx.clone());
    let runner = CommandRunner::new(Arc::clone(&engine), pool, roster, CommandSettings::from(config))
        .with_notices(notice_tx);

    info!("Serving; reading presence events from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&line, &event_tx, &runner, &ledger).await,
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "Failed to read input");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    drop(event_tx);
    let events = listener.await?;
    drop(runner);
    let stats = host.await?;
    info!(
        events,
        restored = stats.restored,
        balances_synced = stats.balances_synced,
        failures = stats.failures,
        "Serve loop finished"
    );

    if config.settings.delete_userdata_on_shutdown {
        let removed = engine.delete_all_local().await?;
        info!(removed, "Removed userdata on shutdown");
    }
    Ok(())
}

async fn handle_line(
    line: &str,
    events: &mpsc::Sender<PresenceEvent>,
    runner: &CommandRunner,
    ledger: &MemoryLedger,
) {
    let command = match console::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let event = match command {
        ConsoleCommand::Join { key, name } => PresenceEvent::Joined { key, name },
        ConsoleCommand::Quit { key, name } => PresenceEvent::Left { key, name },
        ConsoleCommand::Balance { key, name, amount } => {
            if let Err(err) = ledger.set_balance(key, amount) {
                warn!(%key, error = %err, "Ledger update failed");
                return;
            }
            PresenceEvent::BalanceChanged { key, name }
        }
        ConsoleCommand::Admin(admin) => {
            match runner.execute(admin.into()).await {
                Ok(reply) => println!("{reply}"),
                Err(err) => eprintln!("{err}"),
            }
            return;
        }
    };

    if events.send(event).await.is_err() {
        warn!("Presence listener stopped; dropping event");
    }
}
