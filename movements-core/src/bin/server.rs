//! Movements ledger server binary

use anyhow::Context;
use movements_core::{Config, LedgerStore, MovementLedger};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting movements ledger server");

    // Load configuration
    let config = match std::env::var("MOVEMENTS_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env().context("loading configuration from environment")?,
    };

    #[cfg(feature = "rocksdb")]
    let store = Arc::new(
        movements_core::storage::RocksStore::open(&config.storage)
            .context("opening RocksDB store")?,
    );
    #[cfg(not(feature = "rocksdb"))]
    let store = {
        tracing::warn!("Built without the rocksdb feature, movements are kept in memory");
        Arc::new(movements_core::InMemoryStore::new())
    };

    serve(config, store).await
}

async fn serve<S: LedgerStore>(config: Config, store: Arc<S>) -> anyhow::Result<()> {
    let ledger = MovementLedger::open(config, store).await?;

    let report = ledger.recover_transfers().await?;
    if !report.inconsistent.is_empty() {
        tracing::error!(
            transfers = ?report.inconsistent,
            "Transfers still need reconciliation"
        );
    }

    tokio::signal::ctrl_c().await?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&ledger.metrics().registry().gather(), &mut buffer)?;
    tracing::info!(metrics = %String::from_utf8_lossy(&buffer), "Final metrics");

    tracing::info!("Shutting down movements ledger server");
    ledger.shutdown().await?;
    Ok(())
}
