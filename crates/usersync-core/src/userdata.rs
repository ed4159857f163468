//! The managed flat-file directory.
//!
//! One `<key>.yml` file per player. Writes go to a sibling temp file that is
//! renamed over the target, so readers never observe a half-written record.
//! A missing directory is treated as empty for reads and listing, and created
//! on first write.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use usersync_types::PlayerKey;

use crate::error::FileIoError;

/// Extension of managed flat files.
pub const RECORD_EXTENSION: &str = "yml";

const TEMP_SUFFIX: &str = ".tmp";

/// Handle to the userdata directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserdataDir {
    root: PathBuf,
}

impl UserdataDir {
    /// Manage the files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path of the flat file for `key`.
    pub fn file_for(&self, key: PlayerKey) -> PathBuf {
        self.root.join(format!("{key}.{RECORD_EXTENSION}"))
    }

    /// Create the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::CreateDir`] on failure.
    pub async fn ensure_exists(&self) -> Result<(), FileIoError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| FileIoError::CreateDir {
                path: self.root.clone(),
                source,
            })
    }

    /// Content of the flat file for `key`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::Read`] for any failure other than a missing
    /// file.
    pub async fn read(&self, key: PlayerKey) -> Result<Option<String>, FileIoError> {
        let path = self.file_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FileIoError::Read { path, source }),
        }
    }

    /// Content of an arbitrary file inside the directory.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::Read`] on failure, including a missing file.
    pub async fn read_path(&self, path: &Path) -> Result<String, FileIoError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| FileIoError::Read {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Replace the flat file for `key` with `content`.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError`] if the directory cannot be created or the
    /// write or rename fails.
    pub async fn write(&self, key: PlayerKey, content: &str) -> Result<(), FileIoError> {
        self.ensure_exists().await?;
        let path = self.file_for(key);
        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        if let Err(source) = tokio::fs::write(&temp, content).await {
            return Err(FileIoError::Write { path: temp, source });
        }
        if let Err(source) = tokio::fs::rename(&temp, &path).await {
            // Best effort: do not leave the temp file behind.
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(FileIoError::Write { path, source });
        }
        tracing::debug!(%key, bytes = content.len(), "Wrote flat file");
        Ok(())
    }

    /// Delete the flat file for `key`. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::Delete`] for any failure other than a missing
    /// file.
    pub async fn remove(&self, key: PlayerKey) -> Result<bool, FileIoError> {
        let path = self.file_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(FileIoError::Delete { path, source }),
        }
    }

    /// Every `*.yml` regular file, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::List`] if the directory exists but cannot be
    /// read.
    pub async fn list_records(&self) -> Result<Vec<PathBuf>, FileIoError> {
        let mut files = self.regular_files().await?;
        files.retain(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(RECORD_EXTENSION))
        });
        Ok(files)
    }

    /// Number of `*.yml` files.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::List`] if the directory cannot be read.
    pub async fn count_records(&self) -> Result<usize, FileIoError> {
        Ok(self.list_records().await?.len())
    }

    /// Delete every regular file in the directory. Returns how many were
    /// removed. Subdirectories are left alone.
    ///
    /// # Errors
    ///
    /// Returns the first [`FileIoError`] encountered; files removed before
    /// it stay removed.
    pub async fn remove_all(&self) -> Result<usize, FileIoError> {
        let mut removed: usize = 0;
        for path in self.regular_files().await? {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|source| FileIoError::Delete { path, source })?;
            removed = removed.saturating_add(1);
        }
        Ok(removed)
    }

    /// Copy every regular file into `<backup_root>/<label>-<timestamp>/`.
    /// Returns the created directory.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError`] if listing, creating the target or copying
    /// any file fails.
    pub async fn backup_to(&self, backup_root: &Path, label: &str) -> Result<PathBuf, FileIoError> {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let target = backup_root.join(format!("{label}-{stamp}"));
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|source| FileIoError::CreateDir {
                path: target.clone(),
                source,
            })?;

        let mut copied: usize = 0;
        for path in self.regular_files().await? {
            let Some(name) = path.file_name() else {
                continue;
            };
            tokio::fs::copy(&path, target.join(name))
                .await
                .map_err(|source| FileIoError::Backup {
                    path: path.clone(),
                    source,
                })?;
            copied = copied.saturating_add(1);
        }
        tracing::info!(directory = %target.display(), files = copied, "Backed up userdata");
        Ok(target)
    }

    async fn regular_files(&self) -> Result<Vec<PathBuf>, FileIoError> {
        let list_err = |source: io::Error| FileIoError::List {
            path: self.root.clone(),
            source,
        };
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(list_err(source)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            let file_type = entry.file_type().await.map_err(list_err)?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_directory_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = UserdataDir::new(tmp.path().join("absent"));
        assert!(dir.list_records().await.unwrap().is_empty());
        assert_eq!(dir.read(PlayerKey::new()).await.unwrap(), None);
        assert!(!dir.remove(PlayerKey::new()).await.unwrap());
    }

    #[tokio::test]
    async fn write_replaces_content_and_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = UserdataDir::new(tmp.path().join("userdata"));
        let key = PlayerKey::new();

        dir.write(key, "a: 1\nlong: line\n").await.unwrap();
        dir.write(key, "b: 2\n").await.unwrap();
        assert_eq!(dir.read(key).await.unwrap().as_deref(), Some("b: 2\n"));

        let all = dir.regular_files().await.unwrap();
        assert_eq!(all, vec![dir.file_for(key)]);
    }

    #[tokio::test]
    async fn listing_only_returns_yml_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = UserdataDir::new(tmp.path());
        dir.write(PlayerKey::new(), "a: 1\n").await.unwrap();
        tokio::fs::write(tmp.path().join("notes.txt"), "x").await.unwrap();
        tokio::fs::create_dir(tmp.path().join("nested.yml")).await.unwrap();

        assert_eq!(dir.count_records().await.unwrap(), 1);
        assert_eq!(dir.remove_all().await.unwrap(), 2);
        assert!(tmp.path().join("nested.yml").is_dir());
    }

    #[tokio::test]
    async fn backup_copies_every_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = UserdataDir::new(tmp.path().join("userdata"));
        let key = PlayerKey::new();
        dir.write(key, "money: 3\n").await.unwrap();

        let target = dir.backup_to(&tmp.path().join("backups"), "import").await.unwrap();
        let copied = tokio::fs::read_to_string(target.join(format!("{key}.yml")))
            .await
            .unwrap();
        assert_eq!(copied, "money: 3\n");
        assert!(target.file_name().unwrap().to_string_lossy().starts_with("import-"));
    }
}
