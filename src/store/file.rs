//! Local directory storage backend
//!
//! Each upload is stored as two files inside the configured directory:
//!
//! - `<id>.bin` - the bytes written so far
//! - `<id>.info` - JSON-encoded [`UploadInfo`]
//!
//! Writes are read-check-write sequences and are not atomic with respect to
//! each other, so a [`MemoryLocker`](super::MemoryLocker) should be registered
//! alongside this store.

use super::{
    DataStore, StoreComposer, StoreError, Terminater, UploadInfo, UploadReader, UseIn,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Filesystem-backed store supplying Core and Terminater
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory must already exist; see
    /// [`FileStore::open`].
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the directory if needed and return a store rooted at it
    pub async fn open<P: Into<PathBuf>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn bin_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        Self::validate_id(id)?;
        Ok(self.dir.join(format!("{}.bin", id)))
    }

    fn info_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        Self::validate_id(id)?;
        Ok(self.dir.join(format!("{}.info", id)))
    }

    /// IDs are generated by this store; anything that could escape the
    /// directory is treated as unknown.
    fn validate_id(id: &str) -> Result<(), StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    async fn read_info(&self, id: &str) -> Result<UploadInfo, StoreError> {
        let path = self.info_path(id)?;
        let raw = fs::read(&path).await.map_err(|e| not_found_or_io(e, id))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_info(&self, info: &UploadInfo) -> Result<(), StoreError> {
        let path = self.info_path(&info.id)?;
        let raw = serde_json::to_vec(info)?;
        fs::write(&path, raw).await?;
        Ok(())
    }

    /// Create the data file and its info sidecar, leaving nothing behind if
    /// either step fails.
    async fn create_files(&self, info: UploadInfo) -> Result<(), StoreError> {
        let bin = self.bin_path(&info.id)?;
        fs::File::create(&bin).await?;

        if let Err(e) = self.write_info(&info).await {
            if let Err(cleanup) = fs::remove_file(&bin).await {
                tracing::warn!(upload.id = %info.id, error = %cleanup, "Failed to remove data file");
            }
            return Err(e);
        }
        Ok(())
    }
}

fn not_found_or_io(err: std::io::Error, id: &str) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound(id.to_string())
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl DataStore for FileStore {
    #[tracing::instrument(name = "file_store.new_upload", skip(self), err)]
    async fn new_upload(&self, size: u64) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.create_files(UploadInfo::new(id.clone(), size)).await?;

        tracing::debug!(upload.id = %id, dir = %self.dir.display(), "Created upload files");
        Ok(id)
    }

    #[tracing::instrument(
        name = "file_store.write_chunk",
        skip(self, data),
        fields(upload.id = %id, upload.offset = offset, upload.bytes = data.len()),
        err
    )]
    async fn write_chunk(&self, id: &str, offset: u64, data: Bytes) -> Result<u64, StoreError> {
        let mut info = self.read_info(id).await?;
        let len = data.len() as u64;
        info.check_write(offset, len)?;

        // Bytes past the recorded offset are left over from a failed write
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.bin_path(id)?)
            .await
            .map_err(|e| not_found_or_io(e, id))?;
        file.set_len(info.offset).await?;
        file.seek(SeekFrom::Start(info.offset)).await?;
        file.write_all(&data).await?;
        file.flush().await?;

        info.offset += len;
        self.write_info(&info).await?;
        Ok(len)
    }

    async fn get_info(&self, id: &str) -> Result<UploadInfo, StoreError> {
        self.read_info(id).await
    }

    async fn get_reader(&self, id: &str) -> Result<UploadReader, StoreError> {
        let file = fs::File::open(self.bin_path(id)?)
            .await
            .map_err(|e| not_found_or_io(e, id))?;
        Ok(Box::new(file))
    }
}

#[async_trait]
impl Terminater for FileStore {
    #[tracing::instrument(name = "file_store.terminate", skip(self), err)]
    async fn terminate(&self, id: &str) -> Result<(), StoreError> {
        fs::remove_file(self.info_path(id)?)
            .await
            .map_err(|e| not_found_or_io(e, id))?;

        match fs::remove_file(self.bin_path(id)?).await {
            Ok(()) => Ok(()),
            // info already gone, the upload no longer exists either way
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

impl UseIn for FileStore {
    fn use_in(self: Arc<Self>, composer: &mut StoreComposer) {
        composer.use_core(self.clone());
        composer.use_terminater(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(FileStore::validate_id("0f3a9c").is_ok());
        assert!(FileStore::validate_id("").is_err());
        assert!(FileStore::validate_id("../etc/passwd").is_err());
        assert!(FileStore::validate_id("a/b").is_err());
    }

    #[tokio::test]
    async fn test_new_upload_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let id = store.new_upload(42).await.unwrap();

        assert!(dir.path().join(format!("{}.bin", id)).exists());
        assert!(dir.path().join(format!("{}.info", id)).exists());

        let info = store.get_info(&id).await.unwrap();
        assert_eq!(info.size, 42);
        assert_eq!(info.offset, 0);
    }

    #[tokio::test]
    async fn test_failed_info_write_removes_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        // A directory in the sidecar's place makes the info write fail
        std::fs::create_dir(dir.path().join("blocked.info")).unwrap();

        let result = store
            .create_files(UploadInfo::new("blocked".to_string(), 10))
            .await;

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(!dir.path().join("blocked.bin").exists());
    }

    #[tokio::test]
    async fn test_write_overwrites_unrecorded_tail() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let id = store.new_upload(6).await.unwrap();
        store
            .write_chunk(&id, 0, Bytes::from_static(b"abc"))
            .await
            .unwrap();

        // Bytes that reached the data file but never the info sidecar
        let bin = dir.path().join(format!("{}.bin", id));
        let mut raw = std::fs::read(&bin).unwrap();
        raw.extend_from_slice(b"zz");
        std::fs::write(&bin, raw).unwrap();

        store
            .write_chunk(&id, 3, Bytes::from_static(b"def"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&bin).unwrap(), b"abcdef");
        assert_eq!(store.get_info(&id).await.unwrap().offset, 6);
    }
}
