//! Boot: open the record store, wire the bus, assemble the manager.

use crate::config::{database_path, load_config};
use crate::error::{KernelError, KernelResult};
use crate::event_bus::EventBus;
use crate::manager::{Collaborators, OutOfBandManager};
use crate::records::Records;
use oobx_memory::RecordStore;
use oobx_types::config::OobConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// A booted engine.
pub struct OobKernel {
    manager: OutOfBandManager,
}

impl OobKernel {
    /// Boot from the config file at `config_path` (or the default location).
    pub fn boot(config_path: Option<&Path>, collaborators: Collaborators) -> KernelResult<Self> {
        Self::boot_with_config(load_config(config_path), collaborators)
    }

    /// Boot with an explicit configuration, opening the SQLite database it names.
    pub fn boot_with_config(config: OobConfig, collaborators: Collaborators) -> KernelResult<Self> {
        let db_path = database_path(&config);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| KernelError::DataDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let store = RecordStore::open(&db_path).map_err(|source| KernelError::StoreUnavailable {
            path: db_path.clone(),
            source,
        })?;
        info!(path = %db_path.display(), "Opened record store");
        Ok(Self::assemble(config, store, collaborators))
    }

    /// Boot against an in-memory store. Nothing survives the process.
    pub fn in_memory(config: OobConfig, collaborators: Collaborators) -> KernelResult<Self> {
        let store =
            RecordStore::open_in_memory().map_err(|source| KernelError::StoreUnavailable {
                path: PathBuf::from(":memory:"),
                source,
            })?;
        Ok(Self::assemble(config, store, collaborators))
    }

    fn assemble(config: OobConfig, store: RecordStore, collaborators: Collaborators) -> Self {
        let records = Records::new(store, Arc::new(EventBus::new()));
        let manager = OutOfBandManager::new(config, records, collaborators);
        info!(
            label = %manager.config().default_label,
            protocols = ?manager.config().supported_handshake_protocols,
            "Out-of-band engine booted"
        );
        Self { manager }
    }

    pub fn manager(&self) -> &OutOfBandManager {
        &self.manager
    }
}
