//! Periodic background jobs.
//!
//! | Job | Period | Action |
//! |-----|--------|--------|
//! | auto-save | `settings.auto_sync_interval_minutes` | checkpoint every online player |
//! | cleanup | `cleanup.interval_hours` (when `cleanup.enabled`) | retention delete |
//! | resync | `balance.resync_interval_minutes` | post [`HostNotice::ResyncBalances`] |
//!
//! A job whose period is zero or disabled is not started. The first run of
//! each job happens one full period after start. Runs that fall behind are
//! delayed rather than bunched up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::UsersyncConfig;
use crate::engine::SyncEngine;
use crate::pool::WorkerPool;
use crate::presence::{HostNotice, Roster};

/// Handle to the running background jobs.
#[derive(Debug)]
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Scheduler {
    /// Start every job the configuration enables. Also queues the
    /// on-start cleanup when `cleanup.on_start` is set.
    pub fn start(
        config: &UsersyncConfig,
        engine: Arc<SyncEngine>,
        pool: WorkerPool,
        roster: Roster,
        notices: mpsc::Sender<HostNotice>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let inactive_days = config.cleanup.inactive_days;

        if config.cleanup.on_start {
            let engine = Arc::clone(&engine);
            let pool = pool.clone();
            tasks.spawn(async move { run_cleanup(&engine, &pool, inactive_days).await });
        }

        if let Some(period) = config.settings.auto_sync_interval() {
            let (engine, pool, roster, notices) =
                (Arc::clone(&engine), pool.clone(), roster, notices.clone());
            tasks.spawn(every(period, "auto-save", shutdown.subscribe(), move || {
                let (engine, pool, roster, notices) =
                    (Arc::clone(&engine), pool.clone(), roster.clone(), notices.clone());
                async move { run_auto_save(&engine, &pool, &roster, &notices).await }
            }));
        }

        if let Some(period) = config.cleanup.interval() {
            let (engine, pool) = (Arc::clone(&engine), pool.clone());
            tasks.spawn(every(period, "cleanup", shutdown.subscribe(), move || {
                let (engine, pool) = (Arc::clone(&engine), pool.clone());
                async move { run_cleanup(&engine, &pool, inactive_days).await }
            }));
        }

        if let Some(period) = config.balance.resync_interval() {
            tasks.spawn(every(period, "balance resync", shutdown.subscribe(), move || {
                let notices = notices.clone();
                async move {
                    if notices.send(HostNotice::ResyncBalances).await.is_err() {
                        tracing::debug!("Host context gone; skipping balance resync");
                    }
                }
            }));
        }

        tracing::info!(jobs = tasks.len(), "Scheduler started");
        Self { shutdown, tasks }
    }

    /// Number of running background tasks.
    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every job and wait for the current runs to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "Scheduled job failed");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn every<F, Fut>(period: Duration, job: &'static str, mut shutdown: watch::Receiver<bool>, mut run: F)
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let first = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(job, period_secs = period.as_secs(), "Scheduled job registered");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracing::debug!(job, "Running scheduled job");
                run().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn run_auto_save(
    engine: &Arc<SyncEngine>,
    pool: &WorkerPool,
    roster: &Roster,
    notices: &mpsc::Sender<HostNotice>,
) {
    let players = roster.snapshot().await;
    if players.is_empty() {
        return;
    }

    let handles: Vec<_> = players
        .iter()
        .map(|(key, name)| {
            let (engine, key, name) = (Arc::clone(engine), *key, name.clone());
            pool.spawn(async move { engine.checkpoint(key, &name).await })
        })
        .collect();

    let mut saved: usize = 0;
    let mut failed: usize = 0;
    for ((key, name), handle) in players.into_iter().zip(handles) {
        match handle.await {
            Ok(true) => {
                saved = saved.saturating_add(1);
                if notices.send(HostNotice::BalanceDirty { key, name }).await.is_err() {
                    tracing::debug!("Host context gone; not refreshing balances");
                }
            }
            Ok(false) => {}
            Err(err) => {
                failed = failed.saturating_add(1);
                tracing::warn!(%key, name = %name, error = %err, "Auto-save failed");
            }
        }
    }
    tracing::info!(saved, failed, "Auto-save finished");
}

async fn run_cleanup(engine: &Arc<SyncEngine>, pool: &WorkerPool, inactive_days: u32) {
    let engine = Arc::clone(engine);
    match pool.spawn(async move { engine.cleanup(inactive_days).await }).await {
        Ok(removed) => tracing::debug!(removed, "Scheduled cleanup finished"),
        Err(err) => tracing::error!(error = %err, "Scheduled cleanup failed"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn periodic_job_runs_once_per_period_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let task = tokio::spawn(every(Duration::from_secs(60), "test", rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(122)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn default_config_starts_no_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(SyncEngine::new(
            usersync_db::MemoryStore::new().into(),
            crate::userdata::UserdataDir::new(tmp.path()),
            crate::engine::SyncSettings::default(),
        ));
        let (notices, _rx) = mpsc::channel(4);
        let scheduler = Scheduler::start(
            &UsersyncConfig::default(),
            engine,
            WorkerPool::new(1),
            Roster::new(),
            notices,
        );
        assert_eq!(scheduler.job_count(), 0);
        scheduler.shutdown().await;
    }
}
