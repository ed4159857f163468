//! Error types for the store adapter.
//!
//! Per-call failures are [`StoreError`], which always names the SQL
//! operation that failed. Pool construction and schema setup failures are
//! [`StoreInitError`]; those are fatal at startup and never retried.

/// A single store operation failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `PostgreSQL` query failed, including connection-acquire timeouts.
    #[error("{operation} failed: {source}")]
    Query {
        /// The logical SQL operation that was running.
        operation: &'static str,
        /// The underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The store could not be reached at all.
    #[error("{operation} failed: store unavailable")]
    Unavailable {
        /// The logical SQL operation that was attempted.
        operation: &'static str,
    },
}

impl StoreError {
    /// Build a mapper that tags a driver error with the failing operation.
    ///
    /// Intended for `.map_err(StoreError::query("..."))` on both results and
    /// row streams.
    pub fn query(operation: &'static str) -> impl Fn(sqlx::Error) -> Self + Copy + Send {
        move |source| Self::Query { operation, source }
    }

    /// The logical operation that failed.
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Query { operation, .. } | Self::Unavailable { operation } => operation,
        }
    }
}

/// The store could not be set up. Aborts startup.
#[derive(Debug, thiserror::Error)]
pub enum StoreInitError {
    /// The connection settings are invalid.
    #[error("invalid database configuration: {0}")]
    Config(String),

    /// The initial pool connection failed.
    #[error("failed to connect to PostgreSQL: {0}")]
    Connect(#[source] sqlx::Error),

    /// Creating the schema failed.
    #[error("failed to create schema: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_error_names_the_operation() {
        let err = StoreError::query("upsert player record")(sqlx::Error::PoolTimedOut);
        assert_eq!(err.operation(), "upsert player record");
        assert!(err.to_string().starts_with("upsert player record failed"));
    }
}
