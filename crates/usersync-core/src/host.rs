//! The host context: the single consumer of [`HostNotice`]s.
//!
//! Stands in for the host's main thread. Everything that reads or moves a
//! ledger balance runs here, one notice at a time, after the worker pool has
//! finished the matching file or store step.

use tokio::sync::mpsc;
use usersync_types::PlayerKey;

use crate::presence::{HostNotice, Roster};
use crate::reconciler::{BalanceReconciler, ReconcileOutcome};

/// Counters reported when the host context stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Notices processed.
    pub handled: usize,
    /// Loads that moved the ledger to the cached balance.
    pub restored: usize,
    /// Balance cache rows written.
    pub balances_synced: usize,
    /// Load or save failures reported by the listener.
    pub failures: usize,
}

/// Owns ledger-side follow-ups.
#[derive(Debug)]
pub struct HostContext {
    reconciler: BalanceReconciler,
    roster: Roster,
    stats: HostStats,
}

impl HostContext {
    /// Create a host context.
    pub fn new(reconciler: BalanceReconciler, roster: Roster) -> Self {
        Self {
            reconciler,
            roster,
            stats: HostStats::default(),
        }
    }

    /// Counters so far.
    pub const fn stats(&self) -> HostStats {
        self.stats
    }

    /// Process one notice.
    pub async fn handle(&mut self, notice: HostNotice) {
        self.stats.handled = self.stats.handled.saturating_add(1);
        match notice {
            HostNotice::Loaded { key, name } => {
                match self.reconciler.restore_on_load(key, &name).await {
                    Ok(ReconcileOutcome::Restored { .. }) => {
                        self.stats.restored = self.stats.restored.saturating_add(1);
                    }
                    Ok(outcome) => tracing::debug!(%key, name = %name, ?outcome, "Balance checked after load"),
                    Err(err) => {
                        tracing::warn!(%key, name = %name, error = %err, "Balance restore after load failed");
                    }
                }
            }
            HostNotice::NoStoredRecord { key, name }
            | HostNotice::Saved { key, name, .. }
            | HostNotice::BalanceDirty { key, name } => {
                self.sync(key, &name).await;
            }
            HostNotice::LoadFailed { key, name, error } => {
                self.stats.failures = self.stats.failures.saturating_add(1);
                tracing::warn!(%key, name = %name, error = %error, "Player joined without a loaded record");
            }
            HostNotice::SaveFailed { key, name, error } => {
                self.stats.failures = self.stats.failures.saturating_add(1);
                tracing::warn!(%key, name = %name, error = %error, "Player left; flat file kept for the next save");
                self.sync(key, &name).await;
            }
            HostNotice::ResyncBalances => {
                let players = self.roster.snapshot().await;
                let written = self.reconciler.resync_all(&players).await;
                self.stats.balances_synced = self.stats.balances_synced.saturating_add(written);
            }
        }
    }

    /// Process notices until every sender is gone.
    pub async fn run(mut self, mut notices: mpsc::Receiver<HostNotice>) -> HostStats {
        while let Some(notice) = notices.recv().await {
            self.handle(notice).await;
        }
        tracing::info!(
            handled = self.stats.handled,
            restored = self.stats.restored,
            balances_synced = self.stats.balances_synced,
            failures = self.stats.failures,
            "Host context stopped"
        );
        self.stats
    }

    async fn sync(&mut self, key: PlayerKey, name: &str) {
        if self.reconciler.sync_balance(key, name).await.is_some() {
            self.stats.balances_synced = self.stats.balances_synced.saturating_add(1);
        }
    }
}
