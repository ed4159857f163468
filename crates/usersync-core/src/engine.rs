//! The sync engine: moves player records between the flat-file directory
//! and the relational store.
//!
//! # Workflows
//!
//! - [`SyncEngine::load`] -- store to file, overwriting any local file
//! - [`SyncEngine::save`] -- file to store, then release the local file
//! - [`SyncEngine::checkpoint`] -- file to store, local file kept
//! - [`SyncEngine::import_all`] -- every flat file to the store
//! - [`SyncEngine::export_all`] -- every stored row to a flat file
//! - [`SyncEngine::cleanup`] -- retention delete of inactive rows
//!
//! `save` treats the file as the newer truth and `load` the store; nothing
//! is merged. The local file is only ever deleted strictly after the store
//! has acknowledged its content, so at least one copy exists at all times.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use usersync_db::{PlayerRecordRow, RecordStore};
use usersync_types::{PlayerKey, RecordLookup};

use crate::codec::{self, CorruptPayloadPolicy, SectionPolicy};
use crate::config::UsersyncConfig;
use crate::error::{CodecError, SyncError};
use crate::fields;
use crate::userdata::UserdataDir;

/// Display name used when no better one is known.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Characters shown by [`RecordView::preview`].
pub const PREVIEW_CHARS: usize = 300;

/// Transform and file-lifecycle settings for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Compress payloads before storing them.
    pub compress: bool,
    /// Section filter applied on save, load and import.
    pub filter: Option<SectionPolicy>,
    /// Byte cap applied on save. `0` disables it.
    pub max_payload_bytes: usize,
    /// Handling of tagged payloads that fail to decode.
    pub corrupt_payload: CorruptPayloadPolicy,
    /// Delete the flat file after a durable save.
    pub delete_local_after_save: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            compress: true,
            filter: None,
            max_payload_bytes: 0,
            corrupt_payload: CorruptPayloadPolicy::Fail,
            delete_local_after_save: true,
        }
    }
}

impl From<&UsersyncConfig> for SyncSettings {
    fn from(config: &UsersyncConfig) -> Self {
        Self {
            compress: config.data.compress,
            filter: config.data.filters.policy().cloned(),
            max_payload_bytes: config.data.max_payload_bytes,
            corrupt_payload: config.data.corrupt_payload,
            delete_local_after_save: config.settings.delete_local_after_save,
        }
    }
}

/// Optional copy of the userdata directory before a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackupHook {
    /// No backup.
    #[default]
    Disabled,
    /// Copy into a timestamped directory under this path.
    CopyTo(PathBuf),
}

impl BackupHook {
    /// Hook for `enabled`, copying into `directory`.
    pub fn when(enabled: bool, directory: &Path) -> Self {
        if enabled {
            Self::CopyTo(directory.to_path_buf())
        } else {
            Self::Disabled
        }
    }

    async fn run(&self, userdata: &UserdataDir, label: &str) -> Result<(), SyncError> {
        if let Self::CopyTo(root) = self {
            userdata.backup_to(root, label).await?;
        }
        Ok(())
    }
}

/// Outcome of a bulk import or export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records the batch looked at.
    pub enumerated: usize,
    /// Records written.
    pub succeeded: usize,
    /// Records logged and skipped.
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, ok: bool) {
        self.enumerated = self.enumerated.saturating_add(1);
        if ok {
            self.succeeded = self.succeeded.saturating_add(1);
        } else {
            self.failed = self.failed.saturating_add(1);
        }
    }
}

/// Diagnostic summary of one stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    /// Record key.
    pub key: PlayerKey,
    /// Stored display name.
    pub name: String,
    /// Last save time.
    pub last_seen: DateTime<Utc>,
    /// Size of the payload column in bytes.
    pub stored_bytes: usize,
    /// Whether the payload carries the compression tag.
    pub compressed: bool,
    /// Size after decoding, or `None` if the payload does not decode.
    pub decoded_bytes: Option<usize>,
    /// Top-level sections of the decoded payload.
    pub sections: Vec<String>,
    /// First [`PREVIEW_CHARS`] characters with newlines escaped.
    pub preview: String,
}

impl RecordView {
    fn from_row(row: &PlayerRecordRow) -> Self {
        let compressed = codec::is_compressed(&row.payload);
        let decoded = if compressed {
            codec::decompress(&row.payload).ok()
        } else {
            Some(row.payload.clone())
        };
        let shown = decoded.as_deref().unwrap_or(&row.payload);

        let mut preview: String = shown
            .chars()
            .take(PREVIEW_CHARS)
            .collect::<String>()
            .replace('\r', "")
            .replace('\n', "\\n");
        if shown.chars().nth(PREVIEW_CHARS).is_some() {
            preview.push_str("...");
        }

        Self {
            key: row.key(),
            name: row.player_name.clone(),
            last_seen: row.last_seen,
            stored_bytes: row.payload.len(),
            compressed,
            decoded_bytes: decoded.as_ref().map(String::len),
            sections: decoded.as_deref().map(codec::section_names).unwrap_or_default(),
            preview,
        }
    }
}

/// Orchestrates the sync workflows. Share it as `Arc<SyncEngine>`.
#[derive(Debug)]
pub struct SyncEngine {
    store: RecordStore,
    userdata: UserdataDir,
    settings: SyncSettings,
    import_backup: BackupHook,
    export_backup: BackupHook,
}

impl SyncEngine {
    /// Create an engine with backups disabled.
    pub fn new(store: RecordStore, userdata: UserdataDir, settings: SyncSettings) -> Self {
        Self {
            store,
            userdata,
            settings,
            import_backup: BackupHook::Disabled,
            export_backup: BackupHook::Disabled,
        }
    }

    /// Build an engine from the full configuration.
    pub fn from_config(store: RecordStore, config: &UsersyncConfig) -> Self {
        Self::new(
            store,
            UserdataDir::new(config.storage.userdata_dir.clone()),
            SyncSettings::from(config),
        )
        .with_import_backup(BackupHook::when(config.backup.before_import, &config.backup.directory))
        .with_export_backup(BackupHook::when(config.backup.before_export, &config.backup.directory))
    }

    /// Back up the userdata directory before every import.
    #[must_use]
    pub fn with_import_backup(mut self, hook: BackupHook) -> Self {
        self.import_backup = hook;
        self
    }

    /// Back up the userdata directory before every export.
    #[must_use]
    pub fn with_export_backup(mut self, hook: BackupHook) -> Self {
        self.export_backup = hook;
        self
    }

    /// The relational store.
    pub const fn store(&self) -> &RecordStore {
        &self.store
    }

    /// The flat-file directory.
    pub const fn userdata(&self) -> &UserdataDir {
        &self.userdata
    }

    /// The active settings.
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Materialize the stored record for `key` as a flat file.
    ///
    /// Returns `false` when nothing is stored for `key`; no file is written
    /// in that case. An existing local file is replaced entirely.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the lookup, decode or write fails.
    pub async fn load(&self, key: PlayerKey, name: &str) -> Result<bool, SyncError> {
        let Some(stored) = self.store.get_record(key).await? else {
            tracing::debug!(%key, name, "No stored record");
            return Ok(false);
        };

        let decoded = codec::decode_stored(&stored, self.settings.corrupt_payload)?;
        let content = self.apply_filter(&decoded);
        self.userdata.write(key, &content).await?;

        tracing::info!(%key, name, stored_bytes = stored.len(), bytes = content.len(), "Loaded player record");
        Ok(true)
    }

    /// Store the flat file for `key` and release it.
    ///
    /// Returns `false` when there is no flat file, or when the store did
    /// not acknowledge the write (the file is kept). The file is deleted
    /// only after an acknowledged write and only when
    /// [`SyncSettings::delete_local_after_save`] is set. A failed delete is
    /// logged; the record is durable, so the save still reports `true`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the read, encode or upsert fails. The file
    /// is untouched in that case.
    pub async fn save(&self, key: PlayerKey, name: &str) -> Result<bool, SyncError> {
        self.store_local(key, name, self.settings.delete_local_after_save)
            .await
    }

    /// Store the flat file for `key` without ever deleting it. Used for
    /// players who are still online.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the read, encode or upsert fails.
    pub async fn checkpoint(&self, key: PlayerKey, name: &str) -> Result<bool, SyncError> {
        self.store_local(key, name, false).await
    }

    async fn store_local(&self, key: PlayerKey, name: &str, release: bool) -> Result<bool, SyncError> {
        let Some(raw) = self.userdata.read(key).await? else {
            tracing::debug!(%key, name, "No flat file to save");
            return Ok(false);
        };

        let payload = self.encode_for_store(key, &raw, true)?;
        if !self.store.upsert_record(key, name, &payload).await? {
            tracing::warn!(%key, name, "Store did not acknowledge save; keeping flat file");
            return Ok(false);
        }

        if release {
            match self.userdata.remove(key).await {
                Ok(_) => tracing::debug!(%key, "Released flat file"),
                Err(err) => {
                    tracing::warn!(%key, error = %err, "Record stored but flat file could not be deleted");
                }
            }
        }

        tracing::info!(%key, name, bytes = payload.len(), released = release, "Saved player record");
        Ok(true)
    }

    /// Upsert every flat file into the store.
    ///
    /// Files that are not named after a valid key, cannot be read or fail
    /// to store are logged and counted as failed. A balance found in a file
    /// is written to the balance cache; failures there are only logged.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the directory cannot be listed or the
    /// backup fails. Nothing has been written in that case.
    pub async fn import_all(&self) -> Result<BatchReport, SyncError> {
        let files = self.userdata.list_records().await?;
        if files.is_empty() {
            tracing::info!(directory = %self.userdata.path().display(), "No flat files to import");
            return Ok(BatchReport::default());
        }
        self.import_backup.run(&self.userdata, "import").await?;

        let mut report = BatchReport::default();
        for path in &files {
            match self.import_file(path).await {
                Ok(()) => report.record(true),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Skipping flat file");
                    report.record(false);
                }
            }
        }

        tracing::info!(
            enumerated = report.enumerated,
            succeeded = report.succeeded,
            failed = report.failed,
            "Import finished"
        );
        Ok(report)
    }

    async fn import_file(&self, path: &Path) -> Result<(), SyncError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        let key = PlayerKey::from_file_stem(&stem)?;
        let raw = self.userdata.read_path(path).await?;

        let name = fields::display_name(&raw).unwrap_or_else(|| UNKNOWN_NAME.to_owned());
        let balance = fields::balance(&raw).unwrap_or_else(|err| {
            tracing::warn!(%key, error = %err, "Ignoring malformed balance");
            None
        });

        let payload = self.encode_for_store(key, &raw, false)?;
        if !self.store.upsert_record(key, &name, &payload).await? {
            return Err(SyncError::Unacknowledged { key });
        }

        if let Some(balance) = balance {
            if let Err(err) = self.store.upsert_balance(key, &name, balance).await {
                tracing::warn!(%key, error = %err, "Failed to seed balance cache");
            }
        }
        tracing::debug!(%key, name, bytes = payload.len(), "Imported flat file");
        Ok(())
    }

    /// Write every stored record to its flat file, overwriting local files.
    ///
    /// Rows that fail to decode or write are logged and counted as failed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the backup fails or the store scan itself
    /// breaks.
    pub async fn export_all(&self) -> Result<BatchReport, SyncError> {
        self.export_backup.run(&self.userdata, "export").await?;
        self.userdata.ensure_exists().await?;

        let mut report = BatchReport::default();
        let mut rows = self.store.stream_records().await;
        while let Some(row) = rows.next().await {
            let row = row?;
            let key = row.key();
            match self.export_row(&row).await {
                Ok(()) => report.record(true),
                Err(err) => {
                    tracing::warn!(%key, error = %err, "Skipping stored record");
                    report.record(false);
                }
            }
        }

        tracing::info!(
            enumerated = report.enumerated,
            succeeded = report.succeeded,
            failed = report.failed,
            "Export finished"
        );
        Ok(report)
    }

    async fn export_row(&self, row: &PlayerRecordRow) -> Result<(), SyncError> {
        let content = codec::decode_stored(&row.payload, self.settings.corrupt_payload)?;
        self.userdata.write(row.key(), &content).await?;
        Ok(())
    }

    /// Delete stored records last seen strictly more than `inactive_days`
    /// days ago. `0` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the delete fails.
    pub async fn cleanup(&self, inactive_days: u32) -> Result<u64, SyncError> {
        if inactive_days == 0 {
            tracing::info!("Cleanup with 0 days requested; nothing to do");
            return Ok(0);
        }
        let removed = self.store.delete_inactive(inactive_days).await?;
        tracing::info!(inactive_days, removed, "Cleanup finished");
        Ok(removed)
    }

    /// Delete the flat file for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::File`] if the delete fails.
    pub async fn delete_local(&self, key: PlayerKey) -> Result<bool, SyncError> {
        Ok(self.userdata.remove(key).await?)
    }

    /// Delete every regular file in the userdata directory.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::File`] on the first failed delete.
    pub async fn delete_all_local(&self) -> Result<usize, SyncError> {
        let removed = self.userdata.remove_all().await?;
        tracing::info!(removed, directory = %self.userdata.path().display(), "Deleted userdata files");
        Ok(removed)
    }

    /// Diagnostic view of a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the lookup fails.
    pub async fn view_record(&self, lookup: &RecordLookup) -> Result<Option<RecordView>, SyncError> {
        let row = match lookup {
            RecordLookup::Key(key) => self.store.get_record_row(*key).await?,
            RecordLookup::Name(name) => self.store.find_record_by_name(name).await?,
        };
        Ok(row.as_ref().map(RecordView::from_row))
    }

    fn apply_filter<'a>(&self, payload: &'a str) -> Cow<'a, str> {
        match &self.settings.filter {
            Some(policy) => Cow::Owned(codec::filter(payload, policy)),
            None => Cow::Borrowed(payload),
        }
    }

    fn encode_for_store(&self, key: PlayerKey, raw: &str, apply_cap: bool) -> Result<String, CodecError> {
        let filtered = self.apply_filter(raw);
        let capped = if apply_cap && self.settings.max_payload_bytes > 0 {
            let capped = codec::cap(&filtered, self.settings.max_payload_bytes);
            if capped.is_truncated() {
                tracing::warn!(
                    %key,
                    max_bytes = self.settings.max_payload_bytes,
                    dropped = capped.dropped,
                    "Payload exceeds size limit; truncated before storing"
                );
            }
            Cow::Owned(capped.payload)
        } else {
            filtered
        };

        if self.settings.compress {
            codec::compress(&capped)
        } else {
            Ok(capped.into_owned())
        }
    }
}
