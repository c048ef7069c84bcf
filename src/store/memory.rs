//! In-process storage backend
//!
//! Keeps every upload in memory. Each operation runs under a single mutex, so
//! concurrent writes to the same upload cannot interleave and no Locker is
//! required.

use super::{
    DataStore, StoreComposer, StoreError, Terminater, UploadInfo, UploadReader, UseIn,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

struct MemoryUpload {
    info: UploadInfo,
    data: BytesMut,
}

/// Memory-backed store supplying Core and Terminater
#[derive(Default)]
pub struct MemoryStore {
    uploads: Mutex<HashMap<String, MemoryUpload>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of uploads currently held
    pub fn len(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.uploads.lock().contains_key(id)
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn new_upload(&self, size: u64) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let upload = MemoryUpload {
            info: UploadInfo::new(id.clone(), size),
            data: BytesMut::new(),
        };
        self.uploads.lock().insert(id.clone(), upload);
        Ok(id)
    }

    async fn write_chunk(&self, id: &str, offset: u64, data: Bytes) -> Result<u64, StoreError> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let len = data.len() as u64;
        upload.info.check_write(offset, len)?;
        upload.data.extend_from_slice(&data);
        upload.info.offset += len;
        Ok(len)
    }

    async fn get_info(&self, id: &str) -> Result<UploadInfo, StoreError> {
        self.uploads
            .lock()
            .get(id)
            .map(|upload| upload.info.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_reader(&self, id: &str) -> Result<UploadReader, StoreError> {
        let data = self
            .uploads
            .lock()
            .get(id)
            .map(|upload| upload.data.clone().freeze())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }
}

#[async_trait]
impl Terminater for MemoryStore {
    async fn terminate(&self, id: &str) -> Result<(), StoreError> {
        self.uploads
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

impl UseIn for MemoryStore {
    fn use_in(self: Arc<Self>, composer: &mut StoreComposer) {
        composer.use_core(self.clone());
        composer.use_terminater(self);
    }
}
