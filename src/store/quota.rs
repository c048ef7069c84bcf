//! Quota-enforcing store decorator
//!
//! [`QuotaStore`] wraps the Core and Terminater registered in a
//! [`StoreComposer`] and bounds the total number of bytes reserved by live
//! uploads. When a new upload does not fit, the oldest uploads that are not
//! locked are terminated until it does.
//!
//! # Admission
//!
//! 1. `size > max_size` is rejected outright.
//! 2. With `store_size == 0` the upload is passed through untracked.
//! 3. Otherwise the oldest unlocked tracked uploads are evicted until
//!    `used + size <= store_size`.
//! 4. If no evictable upload is left and the upload still does not fit, it is
//!    rejected. Uploads evicted on the way stay evicted.
//! 5. The inner Core creates the upload and its size is reserved.
//!
//! The whole sequence, including backend calls made during eviction, runs
//! under the ledger mutex so two admissions never share freed capacity.

use super::{
    DataStore, Locker, StoreComposer, StoreError, Terminater, UploadInfo, UploadLock,
    UploadReader, UseIn,
};
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Capacity configuration in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Total capacity, 0 disables the quota
    pub store_size: u64,
    /// Per-upload cap, 0 or anything above `store_size` means `store_size`
    pub max_size: u64,
}

impl QuotaConfig {
    pub fn new(store_size: u64, max_size: u64) -> Self {
        Self {
            store_size,
            max_size,
        }
    }

    /// The per-upload cap after clamping to the store size.
    ///
    /// With the quota disabled, 0 means uploads are not capped.
    pub fn effective_max_size(&self) -> u64 {
        if self.store_size > 0 && (self.max_size == 0 || self.max_size > self.store_size) {
            self.store_size
        } else {
            self.max_size
        }
    }
}

/// Snapshot of the quota ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub used: u64,
    pub capacity: u64,
    pub max_size: u64,
    pub tracked: usize,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Reserved size per upload, oldest first
    uploads: IndexMap<String, u64>,
    used: u64,
}

impl Ledger {
    /// Reserve `size` for `id`. A repeated ID replaces its old reservation.
    fn track(&mut self, id: String, size: u64) {
        if let Some(previous) = self.uploads.insert(id, size) {
            self.used -= previous;
        }
        self.used += size;
    }

    fn untrack(&mut self, id: &str) -> Option<u64> {
        let size = self.uploads.shift_remove(id)?;
        self.used -= size;
        Some(size)
    }

    fn untrack_index(&mut self, index: usize) -> Option<(String, u64)> {
        let (id, size) = self.uploads.shift_remove_index(index)?;
        self.used -= size;
        Some((id, size))
    }
}

/// Store decorator enforcing a global byte budget
pub struct QuotaStore {
    core: Arc<dyn DataStore>,
    terminater: Arc<dyn Terminater>,
    locker: Option<Arc<dyn Locker>>,
    store_size: u64,
    max_size: u64,
    ledger: Mutex<Ledger>,
    used: AtomicU64,
}

impl QuotaStore {
    /// Wrap the Core and Terminater currently registered in `composer`.
    ///
    /// The composer's Locker, if any, decides which uploads are in use and
    /// therefore not evictable, so it has to be registered first.
    pub fn new(config: QuotaConfig, composer: &StoreComposer) -> Result<Self, StoreError> {
        let core = composer.require_core()?;
        let terminater = composer.terminater().ok_or_else(|| {
            StoreError::Configuration(
                "storage quota requires a backend with the Terminater capability".into(),
            )
        })?;

        Ok(Self::with_capabilities(
            config,
            core,
            terminater,
            composer.locker(),
        ))
    }

    /// Build from explicit capabilities instead of a composer
    pub fn with_capabilities(
        config: QuotaConfig,
        core: Arc<dyn DataStore>,
        terminater: Arc<dyn Terminater>,
        locker: Option<Arc<dyn Locker>>,
    ) -> Self {
        let max_size = config.effective_max_size();

        tracing::info!(
            store_size = config.store_size,
            max_size = max_size,
            store_size_mb = %format!("{:.2}", config.store_size as f64 / 1024.0 / 1024.0),
            locking = locker.is_some(),
            "Storage quota configured"
        );
        crate::metrics::set_quota_capacity(config.store_size);

        Self {
            core,
            terminater,
            locker,
            store_size: config.store_size,
            max_size,
            ledger: Mutex::new(Ledger::default()),
            used: AtomicU64::new(0),
        }
    }

    /// Total capacity in bytes, 0 when the quota is disabled
    pub fn store_size(&self) -> u64 {
        self.store_size
    }

    /// Effective per-upload cap
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Bytes currently reserved, without waiting for the ledger
    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub async fn usage(&self) -> QuotaUsage {
        let ledger = self.ledger.lock().await;
        QuotaUsage {
            used: ledger.used,
            capacity: self.store_size,
            max_size: self.max_size,
            tracked: ledger.uploads.len(),
        }
    }

    /// Whether `id` currently holds a reservation
    pub async fn is_tracked(&self, id: &str) -> bool {
        self.ledger.lock().await.uploads.contains_key(id)
    }

    fn publish(&self, ledger: &Ledger) {
        self.used.store(ledger.used, Ordering::Release);
        crate::metrics::set_quota_used(ledger.used);
    }

    fn reject(&self, requested: u64, available: u64) -> StoreError {
        crate::metrics::record_upload_rejected();
        tracing::warn!(
            requested = requested,
            available = available,
            "Upload rejected: capacity exceeded"
        );
        StoreError::CapacityExceeded {
            requested,
            available,
        }
    }

    /// Evict the oldest unlocked uploads until `size` more bytes fit.
    async fn make_room(&self, ledger: &mut Ledger, size: u64) -> Result<(), StoreError> {
        let mut cursor = 0;

        while ledger.used + size > self.store_size {
            let (id, reserved) = match ledger.uploads.get_index(cursor) {
                Some((id, reserved)) => (id.clone(), *reserved),
                None => {
                    let available = self.store_size.saturating_sub(ledger.used);
                    return Err(self.reject(size, available));
                }
            };

            // Held for the duration of the terminate call so no writer can
            // pick the upload up while it is being deleted.
            let _lock = match &self.locker {
                Some(locker) => match UploadLock::acquire(locker.clone(), &id) {
                    Ok(lock) => Some(lock),
                    Err(StoreError::LockConflict(_)) => {
                        tracing::debug!(upload.id = %id, "Skipping locked upload during eviction");
                        cursor += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                None => None,
            };

            match self.terminater.terminate(&id).await {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) => {
                    tracing::warn!(upload.id = %id, "Evicted upload was already gone from the backend");
                }
                Err(e) => {
                    crate::metrics::record_error(e.kind());
                    tracing::error!(upload.id = %id, error = %e, "Eviction failed");
                    return Err(e);
                }
            }

            ledger.untrack_index(cursor);
            self.publish(ledger);
            crate::metrics::record_eviction(reserved);
            tracing::info!(
                upload.id = %id,
                freed = reserved,
                used = ledger.used,
                "Evicted upload to free capacity"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl DataStore for QuotaStore {
    #[tracing::instrument(name = "quota.new_upload", skip(self), err)]
    async fn new_upload(&self, size: u64) -> Result<String, StoreError> {
        if self.max_size > 0 && size > self.max_size {
            return Err(self.reject(size, self.max_size));
        }

        if self.store_size == 0 {
            let id = self.core.new_upload(size).await?;
            crate::metrics::record_upload_created();
            return Ok(id);
        }

        let mut ledger = self.ledger.lock().await;
        self.make_room(&mut ledger, size).await?;

        let id = self.core.new_upload(size).await.map_err(|e| {
            crate::metrics::record_error(e.kind());
            e
        })?;
        ledger.track(id.clone(), size);
        self.publish(&ledger);
        crate::metrics::record_upload_created();

        tracing::info!(
            upload.id = %id,
            size = size,
            used = ledger.used,
            capacity = self.store_size,
            "Upload admitted"
        );
        Ok(id)
    }

    async fn write_chunk(&self, id: &str, offset: u64, data: Bytes) -> Result<u64, StoreError> {
        self.core.write_chunk(id, offset, data).await
    }

    async fn get_info(&self, id: &str) -> Result<UploadInfo, StoreError> {
        self.core.get_info(id).await
    }

    async fn get_reader(&self, id: &str) -> Result<UploadReader, StoreError> {
        self.core.get_reader(id).await
    }
}

#[async_trait]
impl Terminater for QuotaStore {
    #[tracing::instrument(name = "quota.terminate", skip(self), err)]
    async fn terminate(&self, id: &str) -> Result<(), StoreError> {
        let mut ledger = self.ledger.lock().await;
        let result = self.terminater.terminate(id).await;

        match &result {
            // A missing upload frees its reservation as well
            Ok(()) | Err(StoreError::NotFound(_)) => {
                if let Some(size) = ledger.untrack(id) {
                    self.publish(&ledger);
                    tracing::debug!(upload.id = %id, freed = size, used = ledger.used, "Released reservation");
                }
            }
            Err(_) => {}
        }

        if result.is_ok() {
            crate::metrics::record_termination();
        }
        result
    }
}

impl UseIn for QuotaStore {
    fn use_in(self: Arc<Self>, composer: &mut StoreComposer) {
        composer.use_core(self.clone());
        composer.use_terminater(self);
    }
}
