//! Server module
//!
//! Assembles the storage stack from configuration and keeps it alive until
//! shutdown. Assembly order matters:
//!
//! 1. The backend registers Core and Terminater.
//! 2. Backends without atomic writes get a [`MemoryLocker`].
//! 3. If a quota is configured, a [`QuotaStore`] wraps whatever is
//!    registered and shadows it.

use crate::config::{BackendConfig, Config, StorageConfig};
use crate::metrics::server::{HealthProbe, MetricsServer, MetricsServerConfig, MetricsServerError};
use crate::store::{
    FileStore, MemoryLocker, MemoryStore, QuotaConfig, QuotaStore, StoreComposer, StoreError,
    UseIn,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Metrics server error: {0}")]
    Metrics(#[from] MetricsServerError),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// The assembled storage capabilities
pub struct StorageStack {
    pub composer: StoreComposer,
    /// Present when a quota is configured
    pub quota: Option<Arc<QuotaStore>>,
    /// Effective per-upload cap (0 = uncapped)
    pub max_size: u64,
}

impl StorageStack {
    /// JSON health document: registered capabilities and quota usage
    pub fn health_probe(&self) -> HealthProbe {
        let capabilities: Vec<String> = self
            .composer
            .capabilities()
            .iter()
            .map(|c| c.to_string())
            .collect();
        let quota = self.quota.clone();
        let max_size = self.max_size;

        Arc::new(move || {
            let quota = quota.as_ref().map(|q| {
                serde_json::json!({
                    "used": q.used_bytes(),
                    "capacity": q.store_size(),
                    "max_size": q.max_size(),
                })
            });
            serde_json::json!({
                "status": "ok",
                "capabilities": capabilities,
                "max_size": max_size,
                "quota": quota,
            })
        })
    }
}

/// Build the composer for `storage`.
///
/// Fails when the result has no Core capability or the quota cannot wrap
/// the chosen backend.
pub async fn assemble_storage(storage: &StorageConfig) -> Result<StorageStack, ServerError> {
    let mut composer = StoreComposer::new();

    match &storage.backend {
        BackendConfig::File { dir } => {
            info!(dir = %dir.display(), "Using directory storage");
            Arc::new(FileStore::open(dir.clone()).await?).use_in(&mut composer);
        }
        BackendConfig::Memory => {
            info!("Using in-memory storage");
            Arc::new(MemoryStore::new()).use_in(&mut composer);
        }
    }

    if storage.backend.needs_locker() {
        Arc::new(MemoryLocker::new()).use_in(&mut composer);
    }

    let mut max_size = storage.max_size;
    let mut quota = None;

    if storage.quota_enabled() {
        let store = Arc::new(QuotaStore::new(
            QuotaConfig::new(storage.store_size, storage.max_size),
            &composer,
        )?);
        store.clone().use_in(&mut composer);
        max_size = store.max_size();
        quota = Some(store);
    }

    if !composer.is_ready() {
        return Err(ServerError::Configuration(
            "storage stack has no Core capability".into(),
        ));
    }

    info!(
        capabilities = %composer,
        max_size = max_size,
        max_size_mb = %format!("{:.2}", max_size as f64 / 1024.0 / 1024.0),
        "Storage stack assembled"
    );

    Ok(StorageStack {
        composer,
        quota,
        max_size,
    })
}

/// Storage server
pub struct Server {
    config: Config,
    stack: StorageStack,
}

impl Server {
    /// Create a new server instance, assembling the storage stack
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Configuration(e.to_string()))?;
        let stack = assemble_storage(&config.storage).await?;
        Ok(Self { config, stack })
    }

    pub fn composer(&self) -> &StoreComposer {
        &self.stack.composer
    }

    pub fn stack(&self) -> &StorageStack {
        &self.stack
    }

    /// Run the server until Ctrl-C
    pub async fn run(&self) -> Result<(), ServerError> {
        let mut metrics = if self.config.metrics.enabled {
            let mut server = MetricsServer::new(MetricsServerConfig {
                address: self.config.metrics.address.clone(),
            })
            .with_health_probe(self.stack.health_probe());
            server.start().await?;
            Some(server)
        } else {
            None
        };

        info!(capabilities = %self.stack.composer, "Storage ready");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ServerError::RuntimeError(e.to_string()))?;

        info!("Shutting down server");
        if let Some(server) = metrics.as_mut() {
            server.shutdown().await;
        }
        Ok(())
    }
}
