//! Mizuchi Store - storage stack for resumable uploads
//!
//! Assembles a storage backend, optional locking and an optional capacity
//! quota, then serves metrics until shutdown.

use clap::Parser;
use mizuchi_store::config::{BackendConfig, Config, LogFormat};
use mizuchi_store::server::Server;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Mizuchi Store - composable upload storage with a capacity quota
#[derive(Parser, Debug)]
#[command(name = "mizuchi-store")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory for the file backend, overrides the configuration
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Total storage capacity in bytes (0 = unlimited)
    #[arg(long)]
    store_size: Option<u64>,

    /// Maximum size of a single upload in bytes
    #[arg(long)]
    max_size: Option<u64>,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.upload_dir {
            config.storage.backend = BackendConfig::File { dir: dir.clone() };
        }
        if let Some(store_size) = self.store_size {
            config.storage.store_size = store_size;
        }
        if let Some(max_size) = self.max_size {
            config.storage.max_size = max_size;
        }
    }
}

fn init_logging(level: &str, format: LogFormat) -> anyhow::Result<()> {
    // RUST_LOG wins over the command line
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer.json());
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer.pretty());
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    args.apply_overrides(&mut config);

    init_logging(&args.log_level, config.logging.format)?;

    info!("Starting Mizuchi Store v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
