//! `usersync` binary: bulk transfers, admin commands and the serve loop.
//!
//! # Usage
//!
//! ```bash
//! # Push every flat file into the store
//! usersync import
//!
//! # Materialize every stored record as a flat file
//! usersync export
//!
//! # Drop records unseen for 90 days
//! usersync cleanup 90
//!
//! # Inspect one record
//! usersync viewdata Notch
//!
//! # Drive presence events from stdin
//! usersync serve
//! ```
//!
//! # Startup Sequence
//!
//! 1. Parse arguments and load `usersync-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and apply migrations (or use `--memory`)
//! 4. Build the sync engine and worker pool
//! 5. Run the command or the serve loop
//! 6. Drain the pool and close the store

mod console;
mod error;
mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use usersync_core::{Command, CommandRunner, CommandSettings, Roster, SyncEngine, UsersyncConfig, WorkerPool};
use usersync_db::{MemoryStore, PostgresPool, RecordStore};
use usersync_types::{PlayerKey, RecordLookup};

use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(name = "usersync")]
#[command(version)]
#[command(about = "Sync per-player flat files with a relational store")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "usersync-config.yaml")]
    config: PathBuf,

    /// Use the in-process store instead of the database (nothing persists)
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Admin(AdminCommand),

    /// Run the presence-driven sync loop, reading events from stdin
    Serve,
}

/// Administrative commands, shared by the command line and the serve
/// console.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum AdminCommand {
    /// Upsert every flat file into the store
    Import,

    /// Write every stored record to a flat file
    Export,

    /// Delete stored records unseen for more than DAYS days
    Cleanup {
        /// Inactivity threshold (default: cleanup.inactive_days)
        days: Option<u32>,
    },

    /// Store one player's flat file and keep it
    Sync {
        /// Player key
        key: PlayerKey,
    },

    /// Store one player's flat file and delete it
    #[command(name = "forcesave")]
    ForceSave {
        /// Player key
        key: PlayerKey,
    },

    /// Materialize one player's stored record
    Load {
        /// Player key
        key: PlayerKey,
    },

    /// Delete local data
    Delete {
        #[command(subcommand)]
        target: DeleteTarget,
    },

    /// Show store connectivity, counts and settings
    Status,

    /// Show a stored record by key or name
    #[command(name = "viewdata")]
    ViewData {
        /// Player key or last known name
        player: String,
    },

    /// Show the highest cached balances
    #[command(name = "baltop")]
    BalTop {
        /// Number of entries, 1 to 50 (default 10)
        limit: Option<u32>,
    },
}

/// What `delete` removes.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteTarget {
    /// Every file in the userdata directory
    Userdata,
}

impl From<AdminCommand> for Command {
    fn from(command: AdminCommand) -> Self {
        match command {
            AdminCommand::Import => Self::Import,
            AdminCommand::Export => Self::Export,
            AdminCommand::Cleanup { days } => Self::Cleanup { days },
            AdminCommand::Sync { key } => Self::Sync { key },
            AdminCommand::ForceSave { key } => Self::ForceSave { key },
            AdminCommand::Load { key } => Self::Load { key },
            AdminCommand::Delete {
                target: DeleteTarget::Userdata,
            } => Self::DeleteUserdata,
            AdminCommand::Status => Self::Status,
            AdminCommand::ViewData { player } => Self::ViewRecord {
                lookup: RecordLookup::parse(&player),
            },
            AdminCommand::BalTop { limit } => Self::BalanceTop { limit },
        }
    }
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if startup fails or the command is rejected.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration.
    let (config, from_file) = load_config(&cli.config)?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(
        path = %cli.config.display(),
        from_file,
        userdata_dir = %config.storage.userdata_dir.display(),
        "Configuration loaded"
    );

    // 3. Open the store.
    let store = open_store(&config, cli.memory).await?;
    info!(backend = store.backend(), "Store ready");

    // 4. Build the engine and pool.
    let engine = Arc::new(SyncEngine::from_config(store.clone(), &config));
    let pool = WorkerPool::new(config.settings.max_concurrent_jobs);
    let roster = Roster::new();

    // 5. Run.
    let result = match cli.command {
        Commands::Serve => serve::run(&config, &store, Arc::clone(&engine), pool.clone(), roster).await,
        Commands::Admin(command) => {
            let runner = CommandRunner::new(engine, pool.clone(), roster, CommandSettings::from(&config));
            match runner.execute(command.into()).await {
                Ok(reply) => {
                    println!("{reply}");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }
    };

    // 6. Shut down.
    pool.drain().await;
    pool.close();
    store.close().await;
    info!("usersync stopped");
    result
}

/// Load configuration, falling back to defaults when the file is missing.
/// Returns whether the file was read.
fn load_config(path: &Path) -> Result<(UsersyncConfig, bool), CliError> {
    if path.exists() {
        Ok((UsersyncConfig::from_file(path)?, true))
    } else {
        let mut config = UsersyncConfig::default();
        config.apply_env_overrides();
        Ok((config, false))
    }
}

async fn open_store(config: &UsersyncConfig, memory: bool) -> Result<RecordStore, CliError> {
    if memory {
        return Ok(RecordStore::from(MemoryStore::new()));
    }
    let pg = config.database.to_postgres_config();
    info!(
        max_connections = pg.max_connections,
        acquire_timeout_ms = config.database.acquire_timeout_ms,
        "Connecting to PostgreSQL"
    );
    Ok(RecordStore::from(PostgresPool::connect_and_initialize(&pg).await?))
}
