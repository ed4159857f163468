//! Line protocol read by `usersync serve`.
//!
//! ```text
//! join <key> <name>              player came online
//! quit <key> <name>              player went offline
//! balance <key> <name> <amount>  set the ledger balance
//! <admin command>                same syntax as the command line
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use usersync_types::PlayerKey;

use crate::AdminCommand;
use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(name = "console", no_binary_name = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

/// One parsed console line.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    /// A player came online
    Join {
        /// Player key
        key: PlayerKey,
        /// Display name
        name: String,
    },

    /// A player went offline
    Quit {
        /// Player key
        key: PlayerKey,
        /// Display name
        name: String,
    },

    /// Set a player's ledger balance
    Balance {
        /// Player key
        key: PlayerKey,
        /// Display name
        name: String,
        /// New balance
        amount: Decimal,
    },

    #[command(flatten)]
    Admin(AdminCommand),
}

/// Parse one line. Returns `None` for blank and comment lines.
pub(crate) fn parse(line: &str) -> Result<Option<ConsoleCommand>, CliError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    ConsoleLine::try_parse_from(line.split_whitespace())
        .map(|parsed| Some(parsed.command))
        .map_err(|err| CliError::Console {
            message: err.render().to_string(),
        })
}
