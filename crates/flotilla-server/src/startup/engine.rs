//! Engine assembly for the configured storage backend

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use flotilla_common::ManifestStorage;
use flotilla_edge::{EdgeEngine, FsManifestStorage};
use flotilla_persistence::{EmbeddedStore, KvStore, MemoryStore, StorageMode};

use super::config::ServerConfig;

/// Open the store selected by `config` and build an engine over it
pub fn open_engine(config: &ServerConfig) -> anyhow::Result<EdgeEngine> {
    let store: Arc<dyn KvStore> = match config.storage_mode {
        StorageMode::Memory => {
            warn!("Using in-memory storage, fleet state is lost on exit");
            Arc::new(MemoryStore::new())
        }
        StorageMode::Embedded => {
            std::fs::create_dir_all(&config.data_dir).with_context(|| {
                format!("failed to create data directory {}", config.data_dir.display())
            })?;
            let store = EmbeddedStore::open(&config.data_dir).with_context(|| {
                format!("failed to open store at {}", config.data_dir.display())
            })?;
            Arc::new(store)
        }
    };

    let manifests: Arc<dyn ManifestStorage> =
        Arc::new(FsManifestStorage::new(config.manifest_dir.clone()));

    let engine = EdgeEngine::builder(store, manifests)
        .config(config.engine.clone())
        .build()?;

    info!(
        storage = %config.storage_mode,
        manifest_dir = %config.manifest_dir.display(),
        "Edge engine ready"
    );
    Ok(engine)
}
