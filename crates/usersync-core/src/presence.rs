//! Presence-driven sync: join, quit and balance-change signals.
//!
//! The [`PresenceListener`] turns host presence signals into sync jobs on
//! the [`WorkerPool`] and reports completions back to the host context as
//! [`HostNotice`]s. It never touches the ledger itself; everything that
//! does happens in [`HostContext`](crate::host::HostContext) after the I/O
//! step has finished.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use usersync_types::PlayerKey;

use crate::config::SettingsConfig;
use crate::engine::SyncEngine;
use crate::pool::WorkerPool;

/// The players currently online. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    players: Arc<RwLock<BTreeMap<PlayerKey, String>>>,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as online under `name`.
    pub async fn insert(&self, key: PlayerKey, name: &str) {
        self.players.write().await.insert(key, name.to_owned());
    }

    /// Mark `key` as offline. Returns the name it was online under.
    pub async fn remove(&self, key: PlayerKey) -> Option<String> {
        self.players.write().await.remove(&key)
    }

    /// Display name of an online player.
    pub async fn name_of(&self, key: PlayerKey) -> Option<String> {
        self.players.read().await.get(&key).cloned()
    }

    /// Every online player, ordered by key.
    pub async fn snapshot(&self) -> Vec<(PlayerKey, String)> {
        self.players
            .read()
            .await
            .iter()
            .map(|(key, name)| (*key, name.clone()))
            .collect()
    }

    /// Number of online players.
    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }

    /// Whether nobody is online.
    pub async fn is_empty(&self) -> bool {
        self.players.read().await.is_empty()
    }
}

/// A presence signal from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A player came online.
    Joined {
        /// Player key.
        key: PlayerKey,
        /// Display name.
        name: String,
    },
    /// A player went offline.
    Left {
        /// Player key.
        key: PlayerKey,
        /// Display name.
        name: String,
    },
    /// The ledger balance of a player changed.
    BalanceChanged {
        /// Player key.
        key: PlayerKey,
        /// Display name.
        name: String,
    },
}

/// Work handed back to the host context once the async step is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostNotice {
    /// The stored record was materialized as a flat file.
    Loaded {
        /// Player key.
        key: PlayerKey,
        /// Display name.
        name: String,
    },
    /// Nothing was stored for a joining player.
    NoStoredRecord {
        /// Player key.
        key: PlayerKey,
        /// Display name.
        name: String,
    },
    /// Loading the stored record failed.
    LoadFailed {
        /// Player key.
        key: PlayerKey,
        /// Display name.
        name: String,
        /// Rendered error.
        error: String,
    },
    /// The quit-time save finished.
    Saved {
        /// Player key.
        key: PlayerKey,
        /// Display name.
        name: String,
        /// Whether a record was written.
        stored: bool,
    },
    /// The quit-time save failed. The flat file was kept.
    SaveFailed {
        /// Player key.
        key: PlayerKey,
        /// Display name.
        name: String,
        /// Rendered error.
        error: String,
    },
    /// The cached balance of a player is stale.
    BalanceDirty {
        /// Player key.
        key: PlayerKey,
        /// Display name.
        name: String,
    },
    /// Resync the cached balance of every online player.
    ResyncBalances,
}

/// The subset of [`SettingsConfig`] the listener needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSettings {
    /// Load on join.
    pub load_on_join: bool,
    /// Save on quit.
    pub save_on_quit: bool,
    /// Delay between a finished load and [`HostNotice::Loaded`].
    pub post_load_delay: Duration,
    /// Delay between a balance change and [`HostNotice::BalanceDirty`].
    pub balance_signal_delay: Duration,
}

impl From<&SettingsConfig> for PresenceSettings {
    fn from(config: &SettingsConfig) -> Self {
        Self {
            load_on_join: config.load_on_join,
            save_on_quit: config.save_on_quit,
            post_load_delay: config.post_load_delay(),
            balance_signal_delay: config.balance_signal_delay(),
        }
    }
}

/// Consumes [`PresenceEvent`]s and drives the per-player workflows.
#[derive(Debug)]
pub struct PresenceListener {
    engine: Arc<SyncEngine>,
    pool: WorkerPool,
    roster: Roster,
    notices: mpsc::Sender<HostNotice>,
    settings: PresenceSettings,
}

impl PresenceListener {
    /// Create a listener posting to `notices`.
    pub const fn new(
        engine: Arc<SyncEngine>,
        pool: WorkerPool,
        roster: Roster,
        notices: mpsc::Sender<HostNotice>,
        settings: PresenceSettings,
    ) -> Self {
        Self {
            engine,
            pool,
            roster,
            notices,
            settings,
        }
    }

    /// Process events until the channel closes, then wait for every
    /// in-flight follow-up. Returns the number of events handled.
    pub async fn run(self, mut events: mpsc::Receiver<PresenceEvent>) -> usize {
        let mut followups = JoinSet::new();
        let mut handled: usize = 0;

        while let Some(event) = events.recv().await {
            self.dispatch(event, &mut followups).await;
            handled = handled.saturating_add(1);
            while let Some(joined) = followups.try_join_next() {
                log_followup(joined);
            }
        }

        tracing::debug!(pending = followups.len(), "Presence channel closed; waiting for follow-ups");
        while let Some(joined) = followups.join_next().await {
            log_followup(joined);
        }
        tracing::info!(handled, "Presence listener stopped");
        handled
    }

    async fn dispatch(&self, event: PresenceEvent, followups: &mut JoinSet<()>) {
        match event {
            PresenceEvent::Joined { key, name } => {
                self.roster.insert(key, &name).await;
                if self.settings.load_on_join {
                    followups.spawn(self.load_followup(key, name));
                }
            }
            PresenceEvent::Left { key, name } => {
                self.roster.remove(key).await;
                if self.settings.save_on_quit {
                    followups.spawn(self.save_followup(key, name));
                } else {
                    send(&self.notices, HostNotice::BalanceDirty { key, name }).await;
                }
            }
            PresenceEvent::BalanceChanged { key, name } => {
                let notices = self.notices.clone();
                let delay = self.settings.balance_signal_delay;
                followups.spawn(async move {
                    tokio::time::sleep(delay).await;
                    send(&notices, HostNotice::BalanceDirty { key, name }).await;
                });
            }
        }
    }

    fn load_followup(&self, key: PlayerKey, name: String) -> impl Future<Output = ()> + Send + use<> {
        let engine = Arc::clone(&self.engine);
        let notices = self.notices.clone();
        let delay = self.settings.post_load_delay;
        let job_name = name.clone();
        let handle = self
            .pool
            .spawn(async move { engine.load(key, &job_name).await });

        async move {
            let notice = match handle.await {
                Ok(true) => {
                    tokio::time::sleep(delay).await;
                    HostNotice::Loaded { key, name }
                }
                Ok(false) => HostNotice::NoStoredRecord { key, name },
                Err(err) => {
                    tracing::error!(%key, name = %name, error = %err, "Failed to load player record");
                    HostNotice::LoadFailed {
                        key,
                        name,
                        error: err.to_string(),
                    }
                }
            };
            send(&notices, notice).await;
        }
    }

    fn save_followup(&self, key: PlayerKey, name: String) -> impl Future<Output = ()> + Send + use<> {
        let engine = Arc::clone(&self.engine);
        let notices = self.notices.clone();
        let job_name = name.clone();
        let handle = self
            .pool
            .spawn(async move { engine.save(key, &job_name).await });

        async move {
            let notice = match handle.await {
                Ok(stored) => HostNotice::Saved { key, name, stored },
                Err(err) => {
                    tracing::error!(%key, name = %name, error = %err, "Failed to save player record");
                    HostNotice::SaveFailed {
                        key,
                        name,
                        error: err.to_string(),
                    }
                }
            };
            send(&notices, notice).await;
        }
    }
}

async fn send(notices: &mpsc::Sender<HostNotice>, notice: HostNotice) {
    if notices.send(notice).await.is_err() {
        tracing::debug!("Host context gone; dropping notice");
    }
}

fn log_followup(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        tracing::warn!(error = %err, "Presence follow-up task failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roster_tracks_online_players() {
        let roster = Roster::new();
        let a = PlayerKey::new();
        let b = PlayerKey::new();
        roster.insert(a, "Alex").await;
        roster.insert(b, "Steve").await;
        assert_eq!(roster.len().await, 2);
        assert_eq!(roster.name_of(a).await.as_deref(), Some("Alex"));

        assert_eq!(roster.remove(a).await.as_deref(), Some("Alex"));
        assert_eq!(roster.snapshot().await, vec![(b, "Steve".to_owned())]);
        roster.remove(b).await;
        assert!(roster.is_empty().await);
    }

    #[test]
    fn settings_follow_config() {
        let config = SettingsConfig {
            save_on_quit: false,
            post_load_delay_ms: 5,
            ..SettingsConfig::default()
        };
        let settings = PresenceSettings::from(&config);
        assert!(settings.load_on_join);
        assert!(!settings.save_on_quit);
        assert_eq!(settings.post_load_delay, Duration::from_millis(5));
    }
}
