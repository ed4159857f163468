//! Administrative commands.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `Import` | every flat file into the store |
//! | `Export` | every stored record into a flat file |
//! | `Cleanup { days }` | retention delete, defaults to `cleanup.inactive_days` |
//! | `Sync { key }` | store one flat file, keep it |
//! | `ForceSave { key }` | store one flat file, release it |
//! | `Load { key }` | materialize one stored record |
//! | `DeleteUserdata` | remove every flat file |
//! | `Status` | connectivity, counts and effective settings |
//! | `ViewRecord { lookup }` | diagnostic view of a stored record |
//! | `BalanceTop { limit }` | highest cached balances |
//!
//! Heavy work runs on the [`WorkerPool`]. Everything except cleanup and
//! delete is safe to repeat.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use usersync_types::{PlayerKey, RecordLookup};

use crate::config::UsersyncConfig;
use crate::engine::{SyncEngine, UNKNOWN_NAME};
use crate::error::CommandError;
use crate::fields;
use crate::pool::WorkerPool;
use crate::presence::{HostNotice, Roster};

/// Ranking size when none is given.
pub const DEFAULT_TOP_LIMIT: u32 = 10;

/// Largest accepted ranking size.
pub const MAX_TOP_LIMIT: u32 = 50;

/// An administrative request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Import every flat file.
    Import,
    /// Export every stored record.
    Export,
    /// Delete records inactive for longer than `days`.
    Cleanup {
        /// Inactivity threshold; the configured default when `None`.
        days: Option<u32>,
    },
    /// Store the flat file of `key` and keep it.
    Sync {
        /// Player key.
        key: PlayerKey,
    },
    /// Store the flat file of `key` and release it.
    ForceSave {
        /// Player key.
        key: PlayerKey,
    },
    /// Materialize the stored record of `key`.
    Load {
        /// Player key.
        key: PlayerKey,
    },
    /// Delete every flat file.
    DeleteUserdata,
    /// Report connectivity, counts and settings.
    Status,
    /// Show a stored record.
    ViewRecord {
        /// Key or name.
        lookup: RecordLookup,
    },
    /// Show the highest cached balances.
    BalanceTop {
        /// Number of entries; [`DEFAULT_TOP_LIMIT`] when `None`.
        limit: Option<u32>,
    },
}

/// Human-readable command output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReply {
    /// Output lines.
    pub lines: Vec<String>,
}

impl CommandReply {
    fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

/// Configuration values the command layer reports or validates against.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct CommandSettings {
    /// Default cleanup threshold.
    pub inactive_days: u32,
    /// Whether the balance cache is kept.
    pub balance_enabled: bool,
    /// Scheduled cleanup.
    pub cleanup_enabled: bool,
    /// Load on join.
    pub load_on_join: bool,
    /// Save on quit.
    pub save_on_quit: bool,
}

impl From<&UsersyncConfig> for CommandSettings {
    fn from(config: &UsersyncConfig) -> Self {
        Self {
            inactive_days: config.cleanup.inactive_days,
            balance_enabled: config.balance.enabled,
            cleanup_enabled: config.cleanup.enabled,
            load_on_join: config.settings.load_on_join,
            save_on_quit: config.settings.save_on_quit,
        }
    }
}

/// Executes [`Command`]s.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    engine: Arc<SyncEngine>,
    pool: WorkerPool,
    roster: Roster,
    settings: CommandSettings,
    notices: Option<mpsc::Sender<HostNotice>>,
}

impl CommandRunner {
    /// Create a runner.
    pub const fn new(engine: Arc<SyncEngine>, pool: WorkerPool, roster: Roster, settings: CommandSettings) -> Self {
        Self {
            engine,
            pool,
            roster,
            settings,
            notices: None,
        }
    }

    /// Post balance follow-ups for single-player commands to a host
    /// context.
    #[must_use]
    pub fn with_notices(mut self, notices: mpsc::Sender<HostNotice>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Run `command`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] for invalid arguments, a missing record or a
    /// failed workflow.
    pub async fn execute(&self, command: Command) -> Result<CommandReply, CommandError> {
        tracing::info!(?command, "Executing command");
        match command {
            Command::Import => self.import().await,
            Command::Export => self.export().await,
            Command::Cleanup { days } => self.cleanup(days).await,
            Command::Sync { key } => self.store_one(key, false).await,
            Command::ForceSave { key } => self.store_one(key, true).await,
            Command::Load { key } => self.load(key).await,
            Command::DeleteUserdata => self.delete_userdata().await,
            Command::Status => Ok(self.status().await),
            Command::ViewRecord { lookup } => self.view(&lookup).await,
            Command::BalanceTop { limit } => self.balance_top(limit).await,
        }
    }

    async fn import(&self) -> Result<CommandReply, CommandError> {
        let engine = Arc::clone(&self.engine);
        let report = self.pool.spawn(async move { engine.import_all().await }).await?;
        Ok(CommandReply::default().line(format!(
            "Imported {} of {} flat files ({} failed)",
            report.succeeded, report.enumerated, report.failed
        )))
    }

    async fn export(&self) -> Result<CommandReply, CommandError> {
        let engine = Arc::clone(&self.engine);
        let report = self.pool.spawn(async move { engine.export_all().await }).await?;
        Ok(CommandReply::default().line(format!(
            "Exported {} of {} stored records ({} failed)",
            report.succeeded, report.enumerated, report.failed
        )))
    }

    async fn cleanup(&self, days: Option<u32>) -> Result<CommandReply, CommandError> {
        let days = days.unwrap_or(self.settings.inactive_days);
        if days == 0 {
            return Err(CommandError::InvalidDays { days });
        }
        let engine = Arc::clone(&self.engine);
        let removed = self.pool.spawn(async move { engine.cleanup(days).await }).await?;
        Ok(CommandReply::default().line(format!(
            "Removed {removed} records inactive for more than {days} days"
        )))
    }

    async fn store_one(&self, key: PlayerKey, release: bool) -> Result<CommandReply, CommandError> {
        let name = self.resolve_name(key).await;
        let engine = Arc::clone(&self.engine);
        let job_name = name.clone();
        let stored = self
            .pool
            .spawn(async move {
                if release {
                    engine.save(key, &job_name).await
                } else {
                    engine.checkpoint(key, &job_name).await
                }
            })
            .await?;

        if !stored {
            return Ok(CommandReply::default().line(format!("No flat file for {name} ({key})")));
        }
        self.notify(HostNotice::BalanceDirty { key, name: name.clone() }).await;
        let verb = if release { "Saved and released" } else { "Synced" };
        Ok(CommandReply::default().line(format!("{verb} {name} ({key})")))
    }

    async fn load(&self, key: PlayerKey) -> Result<CommandReply, CommandError> {
        let name = self.resolve_name(key).await;
        let engine = Arc::clone(&self.engine);
        let job_name = name.clone();
        let loaded = self
            .pool
            .spawn(async move { engine.load(key, &job_name).await })
            .await?;

        if !loaded {
            return Err(CommandError::NotFound {
                lookup: key.to_string(),
            });
        }
        self.notify(HostNotice::Loaded { key, name: name.clone() }).await;
        Ok(CommandReply::default().line(format!("Loaded {name} ({key})")))
    }

    async fn delete_userdata(&self) -> Result<CommandReply, CommandError> {
        let engine = Arc::clone(&self.engine);
        let removed = self.pool.spawn(async move { engine.delete_all_local().await }).await?;
        Ok(CommandReply::default().line(format!(
            "Deleted {removed} files from {}",
            self.engine.userdata().path().display()
        )))
    }

    async fn status(&self) -> CommandReply {
        let store = self.engine.store();
        let connected = store.is_connected().await;
        let records = match store.count_records().await {
            Ok(count) => count.to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "Could not count stored records");
                "unavailable".to_owned()
            }
        };
        let files = match self.engine.userdata().count_records().await {
            Ok(count) => count.to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "Could not count flat files");
                "unavailable".to_owned()
            }
        };
        let sync = self.engine.settings();

        CommandReply::default()
            .line(format!(
                "Store: {} ({})",
                if connected { "connected" } else { "disconnected" },
                store.backend()
            ))
            .line(format!("Stored records: {records}"))
            .line(format!("Flat files: {files}"))
            .line(format!("Online players: {}", self.roster.len().await))
            .line(format!("Load on join: {}", yes_no(self.settings.load_on_join)))
            .line(format!("Save on quit: {}", yes_no(self.settings.save_on_quit)))
            .line(format!("Compression: {}", yes_no(sync.compress)))
            .line(format!("Filtering: {}", yes_no(sync.filter.is_some())))
            .line(if self.settings.cleanup_enabled {
                format!("Cleanup: enabled ({} days)", self.settings.inactive_days)
            } else {
                "Cleanup: disabled".to_owned()
            })
            .line(format!("Balance cache: {}", yes_no(self.settings.balance_enabled)))
    }

    async fn view(&self, lookup: &RecordLookup) -> Result<CommandReply, CommandError> {
        let Some(view) = self.engine.view_record(lookup).await? else {
            return Err(CommandError::NotFound {
                lookup: describe(lookup),
            });
        };
        let decoded = view
            .decoded_bytes
            .map_or_else(|| "undecodable".to_owned(), |bytes| format!("{bytes} bytes"));
        Ok(CommandReply::default()
            .line(format!("Record {} ({})", view.name, view.key))
            .line(format!("Last seen: {}", view.last_seen.format("%Y-%m-%d %H:%M:%S UTC")))
            .line(format!("Stored size: {} bytes", view.stored_bytes))
            .line(format!("Compressed: {}", yes_no(view.compressed)))
            .line(format!("Decoded size: {decoded}"))
            .line(format!("Sections: {}", view.sections.join(", ")))
            .line(format!("Preview: {}", view.preview)))
    }

    async fn balance_top(&self, limit: Option<u32>) -> Result<CommandReply, CommandError> {
        if !self.settings.balance_enabled {
            return Err(CommandError::BalanceDisabled);
        }
        let limit = limit.unwrap_or(DEFAULT_TOP_LIMIT);
        if !(1..=MAX_TOP_LIMIT).contains(&limit) {
            return Err(CommandError::InvalidLimit {
                limit,
                max: MAX_TOP_LIMIT,
            });
        }

        let entries = self.engine.store().top_balances(limit).await?;
        if entries.is_empty() {
            return Ok(CommandReply::default().line("No cached balances"));
        }
        let reply = entries.iter().zip(1_usize..).fold(
            CommandReply::default().line(format!("Top {} balances", entries.len())),
            |reply, (entry, rank)| reply.line(format!("{rank}. {} - {:.2}", entry.player_name, entry.balance)),
        );
        Ok(reply)
    }

    /// Roster name, else the stored row's name, else the flat file's
    /// `lastAccountName`, else [`UNKNOWN_NAME`].
    async fn resolve_name(&self, key: PlayerKey) -> String {
        if let Some(name) = self.roster.name_of(key).await {
            return name;
        }
        match self.engine.store().get_record_row(key).await {
            Ok(Some(row)) => return row.player_name,
            Ok(None) => {}
            Err(err) => tracing::debug!(%key, error = %err, "Name lookup in store failed"),
        }
        match self.engine.userdata().read(key).await {
            Ok(Some(content)) => {
                if let Some(name) = fields::display_name(&content) {
                    return name;
                }
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(%key, error = %err, "Name lookup in flat file failed"),
        }
        UNKNOWN_NAME.to_owned()
    }

    async fn notify(&self, notice: HostNotice) {
        if let Some(notices) = &self.notices {
            if notices.send(notice).await.is_err() {
                tracing::debug!("Host context gone; dropping command follow-up");
            }
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn describe(lookup: &RecordLookup) -> String {
    match lookup {
        RecordLookup::Key(key) => key.to_string(),
        RecordLookup::Name(name) => format!("name {name:?}"),
    }
}
