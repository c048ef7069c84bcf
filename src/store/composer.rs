//! Capability registry
//!
//! A [`StoreComposer`] holds at most one implementation per [`Capability`].
//! Backends and decorators register into it at startup; the upload protocol
//! layer looks capabilities up afterwards and degrades when one is missing.

use super::{DataStore, Locker, StoreError, Terminater, UploadLock};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Named storage capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Core,
    Terminater,
    Locker,
}

impl Capability {
    /// All capabilities in display order
    pub const ALL: [Capability; 3] = [Capability::Core, Capability::Terminater, Capability::Locker];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Core => "Core",
            Capability::Terminater => "Terminater",
            Capability::Locker => "Locker",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An implementation tagged with the capability it provides
#[derive(Clone)]
pub enum CapabilityImpl {
    Core(Arc<dyn DataStore>),
    Terminater(Arc<dyn Terminater>),
    Locker(Arc<dyn Locker>),
}

impl CapabilityImpl {
    pub fn capability(&self) -> Capability {
        match self {
            CapabilityImpl::Core(_) => Capability::Core,
            CapabilityImpl::Terminater(_) => Capability::Terminater,
            CapabilityImpl::Locker(_) => Capability::Locker,
        }
    }
}

/// Registry of the currently active storage capabilities
#[derive(Default, Clone)]
pub struct StoreComposer {
    core: Option<Arc<dyn DataStore>>,
    terminater: Option<Arc<dyn Terminater>>,
    locker: Option<Arc<dyn Locker>>,
}

impl StoreComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation, replacing any previous one for the same
    /// capability.
    pub fn register(&mut self, implementation: CapabilityImpl) {
        tracing::debug!(
            capability = %implementation.capability(),
            replaced = self.has(implementation.capability()),
            "Registering storage capability"
        );

        match implementation {
            CapabilityImpl::Core(core) => self.core = Some(core),
            CapabilityImpl::Terminater(terminater) => self.terminater = Some(terminater),
            CapabilityImpl::Locker(locker) => self.locker = Some(locker),
        }
    }

    pub fn use_core(&mut self, core: Arc<dyn DataStore>) {
        self.register(CapabilityImpl::Core(core));
    }

    pub fn use_terminater(&mut self, terminater: Arc<dyn Terminater>) {
        self.register(CapabilityImpl::Terminater(terminater));
    }

    pub fn use_locker(&mut self, locker: Arc<dyn Locker>) {
        self.register(CapabilityImpl::Locker(locker));
    }

    pub fn core(&self) -> Option<Arc<dyn DataStore>> {
        self.core.clone()
    }

    pub fn terminater(&self) -> Option<Arc<dyn Terminater>> {
        self.terminater.clone()
    }

    pub fn locker(&self) -> Option<Arc<dyn Locker>> {
        self.locker.clone()
    }

    /// Whether an implementation is registered for `capability`
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Core => self.core.is_some(),
            Capability::Terminater => self.terminater.is_some(),
            Capability::Locker => self.locker.is_some(),
        }
    }

    /// Registered capabilities, in [`Capability::ALL`] order
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.has(*c))
            .collect()
    }

    /// A composer is ready once Core is registered
    pub fn is_ready(&self) -> bool {
        self.core.is_some()
    }

    /// Core, or a configuration error when no backend registered one
    pub fn require_core(&self) -> Result<Arc<dyn DataStore>, StoreError> {
        self.core().ok_or_else(|| {
            StoreError::Configuration("no storage backend registered the Core capability".into())
        })
    }

    /// Lock `id` if a Locker is registered.
    ///
    /// Returns `Ok(None)` when locking is not part of the current
    /// configuration. Only conflicts seen here count towards
    /// `mizuchi_store_lock_conflicts_total`.
    pub fn lock_upload(&self, id: &str) -> Result<Option<UploadLock>, StoreError> {
        let Some(locker) = self.locker() else {
            return Ok(None);
        };

        match UploadLock::acquire(locker, id) {
            Ok(lock) => Ok(Some(lock)),
            Err(e @ StoreError::LockConflict(_)) => {
                crate::metrics::record_lock_conflict();
                tracing::debug!(upload.id = %id, "Upload already locked");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Write a chunk while holding the upload's lock.
    ///
    /// The lock is released when this returns, whether the write succeeded
    /// or not.
    #[tracing::instrument(
        name = "store.write_chunk",
        skip(self, data),
        fields(upload.id = %id, upload.offset = offset, upload.bytes = data.len()),
        err
    )]
    pub async fn write_chunk(&self, id: &str, offset: u64, data: Bytes) -> Result<u64, StoreError> {
        let core = self.require_core()?;
        let _lock = self.lock_upload(id)?;
        core.write_chunk(id, offset, data).await
    }
}

impl fmt::Display for StoreComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, capability) in Capability::ALL.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let mark = if self.has(*capability) { "yes" } else { "no" };
            write!(f, "{}: {}", capability, mark)?;
        }
        Ok(())
    }
}

impl fmt::Debug for StoreComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreComposer")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
