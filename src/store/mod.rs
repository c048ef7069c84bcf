//! Storage capability module
//!
//! Defines the capabilities a storage backend can supply and the
//! implementations shipped with the crate.
//!
//! # Capabilities
//!
//! | Capability | Trait | Required |
//! |------------|-------|----------|
//! | Core | [`DataStore`] | yes |
//! | Terminater | [`Terminater`] | no |
//! | Locker | [`Locker`] | no |
//!
//! Backends register whatever they support into a [`StoreComposer`];
//! decorators such as [`QuotaStore`] wrap the registered capabilities and
//! register themselves in their place.
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_store::store::{
//!     MemoryLocker, MemoryStore, QuotaConfig, QuotaStore, StoreComposer, UseIn,
//! };
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut composer = StoreComposer::new();
//! Arc::new(MemoryStore::new()).use_in(&mut composer);
//! Arc::new(MemoryLocker::new()).use_in(&mut composer);
//!
//! let quota = QuotaStore::new(QuotaConfig::new(100 * 1024 * 1024, 0), &composer)?;
//! Arc::new(quota).use_in(&mut composer);
//!
//! assert!(composer.is_ready());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod composer;
pub mod file;
pub mod locker;
pub mod memory;
pub mod quota;

pub use composer::{Capability, CapabilityImpl, StoreComposer};
pub use file::FileStore;
pub use locker::{MemoryLocker, UploadLock};
pub use memory::MemoryStore;
pub use quota::{QuotaConfig, QuotaStore, QuotaUsage};

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Capacity exceeded: requested {requested} bytes, {available} bytes available")]
    CapacityExceeded { requested: u64, available: u64 },

    #[error("Upload is locked: {0}")]
    LockConflict(String),

    #[error("Upload not found: {0}")]
    NotFound(String),

    #[error("Invalid offset: expected {expected}, got {actual}")]
    InvalidOffset { expected: u64, actual: u64 },

    #[error("Chunk exceeds declared size {size} (would reach {attempted})")]
    ExceedsDeclaredSize { size: u64, attempted: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the error originated in a storage backend rather than in
    /// admission control or locking.
    pub fn is_backend(&self) -> bool {
        !matches!(
            self,
            StoreError::Configuration(_)
                | StoreError::CapacityExceeded { .. }
                | StoreError::LockConflict(_)
        )
    }

    /// Short label used as the metrics error type.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Configuration(_) => "configuration",
            StoreError::CapacityExceeded { .. } => "capacity_exceeded",
            StoreError::LockConflict(_) => "lock_conflict",
            StoreError::NotFound(_) => "not_found",
            StoreError::InvalidOffset { .. } => "invalid_offset",
            StoreError::ExceedsDeclaredSize { .. } => "exceeds_declared_size",
            StoreError::Io(_) => "io",
            StoreError::Serialization(_) => "serialization",
            StoreError::Backend(_) => "backend",
        }
    }
}

/// Upload state as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInfo {
    pub id: String,
    /// Declared total size, fixed at creation
    pub size: u64,
    /// Bytes written so far
    pub offset: u64,
    pub created_at: DateTime<Utc>,
}

impl UploadInfo {
    pub fn new(id: String, size: u64) -> Self {
        Self {
            id,
            size,
            offset: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether every declared byte has been written
    pub fn is_complete(&self) -> bool {
        self.offset >= self.size
    }

    /// Check a write of `len` bytes at `offset` against this upload.
    pub fn check_write(&self, offset: u64, len: u64) -> Result<(), StoreError> {
        if offset != self.offset {
            return Err(StoreError::InvalidOffset {
                expected: self.offset,
                actual: offset,
            });
        }
        let end = offset.saturating_add(len);
        if end > self.size {
            return Err(StoreError::ExceedsDeclaredSize {
                size: self.size,
                attempted: end,
            });
        }
        Ok(())
    }
}

/// Byte stream returned by [`DataStore::get_reader`]
pub type UploadReader = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Core capability every backend must supply
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Create an upload of the given declared size and return its ID
    async fn new_upload(&self, size: u64) -> Result<String, StoreError>;

    /// Append `data` at `offset` and return the number of bytes written
    async fn write_chunk(&self, id: &str, offset: u64, data: Bytes) -> Result<u64, StoreError>;

    /// Describe an upload
    async fn get_info(&self, id: &str) -> Result<UploadInfo, StoreError>;

    /// Open the bytes written so far
    async fn get_reader(&self, id: &str) -> Result<UploadReader, StoreError>;
}

/// Optional deletion capability
#[async_trait]
pub trait Terminater: Send + Sync {
    /// Delete an upload and everything stored for it
    async fn terminate(&self, id: &str) -> Result<(), StoreError>;
}

/// Per-upload mutual exclusion
///
/// Locks are in-process only. Acquisition never waits: a held lock yields
/// [`StoreError::LockConflict`] and the caller decides whether to retry.
pub trait Locker: Send + Sync {
    /// Try to take the exclusive lock for `id`
    fn lock(&self, id: &str) -> Result<(), StoreError>;

    /// Release the lock for `id`. Releasing an unlocked ID is a no-op.
    fn unlock(&self, id: &str);
}

/// Registration of an implementation's capabilities into a composer
pub trait UseIn {
    fn use_in(self: Arc<Self>, composer: &mut StoreComposer);
}
