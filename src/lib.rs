//! Mizuchi Store Library
//!
//! Composable storage backends for resumable upload servers, with a global
//! capacity bound.
//!
//! # Features
//!
//! - **Capability Registry**: Backends register the capabilities they support
//!   (Core, Terminater, Locker) into a [`StoreComposer`]
//! - **Storage Quota**: [`QuotaStore`] bounds the bytes reserved by live
//!   uploads and evicts the oldest unlocked uploads to admit new ones
//! - **Upload Locking**: Fail-fast, in-process per-upload locks
//! - **Metrics**: Prometheus counters and gauges for admission and eviction
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_store::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;
pub use store::{QuotaStore, StoreComposer, StoreError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
