//! Error types for the sync engine and its collaborators.
//!
//! Single-record workflows return [`SyncError`] to the caller. Batch
//! workflows log per-record failures and only return an error when the
//! batch as a whole cannot start (directory unreadable, backup failed,
//! store scan broken).

use std::io;
use std::path::PathBuf;

use rust_decimal::Decimal;
use usersync_db::StoreError;
use usersync_types::{KeyParseError, PlayerKey};

/// A compressed payload could not be produced or decoded.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// `decompress` was called on a payload without the `GZIP:` tag.
    #[error("payload is not tagged as compressed")]
    MissingTag,

    /// The text after the tag is not valid base64.
    #[error("compressed payload is not valid base64: {source}")]
    Base64 {
        /// The underlying decode error.
        #[from]
        source: base64::DecodeError,
    },

    /// The gzip encoder failed.
    #[error("failed to compress payload: {source}")]
    Compress {
        /// The underlying I/O error from the encoder.
        source: io::Error,
    },

    /// The decoded bytes are not a valid gzip stream.
    #[error("compressed payload is not a valid gzip stream: {source}")]
    Inflate {
        /// The underlying I/O error from the decoder.
        source: io::Error,
    },

    /// The inflated bytes are not UTF-8.
    #[error("decompressed payload is not UTF-8: {source}")]
    Utf8 {
        /// The underlying conversion error.
        #[from]
        source: std::string::FromUtf8Error,
    },
}

/// A flat-file operation failed.
#[derive(Debug, thiserror::Error)]
pub enum FileIoError {
    /// Reading a flat file failed.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Writing or replacing a flat file failed.
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        /// File that was being written.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Deleting a flat file failed.
    #[error("failed to delete {}: {source}", .path.display())]
    Delete {
        /// File that was being deleted.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Enumerating the userdata directory failed.
    #[error("failed to list {}: {source}", .path.display())]
    List {
        /// Directory that was being listed.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Creating a directory failed.
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        /// Directory that was being created.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Copying a file into a backup directory failed.
    #[error("failed to back up {}: {source}", .path.display())]
    Backup {
        /// File that was being copied.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
}

/// A sync workflow failed.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The relational store rejected or could not serve the request.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A payload could not be encoded or decoded.
    #[error("codec error: {source}")]
    Codec {
        /// The underlying codec error.
        #[from]
        source: CodecError,
    },

    /// A flat-file operation failed.
    #[error("file error: {source}")]
    File {
        /// The underlying file error.
        #[from]
        source: FileIoError,
    },

    /// A flat file is not named after a valid player key.
    #[error("invalid key: {source}")]
    InvalidKey {
        /// The underlying parse error.
        #[from]
        source: KeyParseError,
    },

    /// The store accepted the upsert but reported no affected row.
    #[error("store did not acknowledge the write for {key}")]
    Unacknowledged {
        /// Key whose write was not acknowledged.
        key: PlayerKey,
    },

    /// The worker task panicked or was aborted.
    #[error("sync worker failed: {source}")]
    Worker {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },

    /// The worker pool was shut down before the job could start.
    #[error("worker pool is shut down")]
    PoolClosed,
}

/// The external ledger refused or failed a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Amounts passed to deposit or withdraw must not be negative.
    #[error("amount must not be negative, got {amount}")]
    NegativeAmount {
        /// The rejected amount.
        amount: Decimal,
    },

    /// The account does not hold enough to cover a withdrawal.
    #[error("insufficient funds for {key}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Account key.
        key: PlayerKey,
        /// Balance at the time of the request.
        balance: Decimal,
        /// Requested withdrawal.
        requested: Decimal,
    },

    /// The arithmetic would overflow the balance type.
    #[error("balance overflow for {key}")]
    Overflow {
        /// Account key.
        key: PlayerKey,
    },

    /// The ledger provider is not reachable.
    #[error("ledger unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

/// A balance reconciliation step failed.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Reading or writing the balance cache failed.
    #[error("balance cache error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// The ledger refused a read or adjustment.
    #[error("ledger error: {source}")]
    Ledger {
        /// The underlying ledger error.
        #[from]
        source: LedgerError,
    },
}

/// An administrative command was rejected or failed.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Cleanup needs at least one day of inactivity.
    #[error("days must be at least 1, got {days}")]
    InvalidDays {
        /// The rejected value.
        days: u32,
    },

    /// Balance ranking limit outside `1..=50`.
    #[error("limit must be between 1 and {max}, got {limit}")]
    InvalidLimit {
        /// The rejected value.
        limit: u32,
        /// Largest accepted value.
        max: u32,
    },

    /// The balance cache is turned off in the configuration.
    #[error("balance cache is disabled")]
    BalanceDisabled,

    /// No stored record matches the lookup.
    #[error("no stored record for {lookup}")]
    NotFound {
        /// What was looked up.
        lookup: String,
    },

    /// The underlying workflow failed.
    #[error(transparent)]
    Sync {
        /// The workflow error.
        #[from]
        source: SyncError,
    },
}

impl From<StoreError> for CommandError {
    fn from(source: StoreError) -> Self {
        Self::Sync {
            source: SyncError::from(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_errors_name_the_path() {
        let err = FileIoError::Read {
            path: PathBuf::from("/srv/userdata/abc.yml"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/srv/userdata/abc.yml"));
    }

    #[test]
    fn sync_error_wraps_store_operation() {
        let err = SyncError::from(StoreError::Unavailable {
            operation: "load player record",
        });
        assert!(err.to_string().contains("load player record"));
    }
}
