//! Initialization helpers for the application startup.

use crate::config::{Config, StorageBackend};
use crate::store::{KeyValueStore, MemoryStore, SqliteStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Sets up the tracing subscriber with the configured filters.
pub fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = config.logging.level.clone();

        // Keep the HTTP stack quiet unless explicitly enabled
        for noisy in ["hyper", "tower_http"] {
            if !filter.contains(noisy) {
                filter.push_str(&format!(",{noisy}=off"));
            }
        }

        tracing_subscriber::EnvFilter::new(filter)
    });

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Opens the configured key-value store backend.
pub fn init_store(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            info!("Using SQLite store at {}", config.storage.sqlite_path);
            let store = SqliteStore::open(config.storage.sqlite_path.clone())
                .with_context(|| format!("Failed to open {}", config.storage.sqlite_path))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            info!("Using in-memory store; state is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
