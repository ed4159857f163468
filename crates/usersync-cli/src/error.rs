//! Error types for the `usersync` binary.

/// Startup and console failures.
///
/// Wraps the subsystem errors `main` can hit before any command runs, so
/// they propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: usersync_core::config::ConfigError,
    },

    /// Connecting to or migrating the store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store initialization error.
        #[from]
        source: usersync_db::StoreInitError,
    },

    /// A console line could not be parsed.
    #[error("{message}")]
    Console {
        /// Rendered parse error.
        message: String,
    },
}
