/// shardctl - slot migration control plane for sharded key-value clusters
///
/// Moves ownership of hash slots between server groups and drives the data
/// transfer between group masters, keeping slot metadata in the coordination
/// store recoverable at every step:
/// 1. Preflight: refuse a task while a conflicting slot migration is in flight
/// 2. Run: take the cluster lock, then mark, move and release slots one by one
pub mod admin;
pub mod backend;
pub mod config;
pub mod error;
pub mod migrate;
pub mod models;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod utils;

pub use admin::ClusterAdmin;
pub use config::Config;
pub use error::{MigrateError, MigrateResult};
pub use migrate::{MigrationSettings, PreflightVerdict, SlotMigrationOrchestrator};
pub use models::{MigrationTask, TaskStatus};

use std::sync::Arc;
use tracing::debug;

use backend::TcpConnector;
use store::CoordinationStore;

/// Everything a command needs: the loaded config, an open store and the
/// identity this process uses for the cluster lock.
pub struct ClusterContext {
    config: Config,
    store: Arc<dyn CoordinationStore>,
    holder: String,
}

impl ClusterContext {
    pub async fn open(config: Config) -> MigrateResult<Self> {
        config.validate()?;
        let store = store::open_store(&config.coordinator).await?;
        let holder = config
            .coordinator
            .lock_holder
            .clone()
            .unwrap_or_else(|| utils::generate_id(&format!("shardctl-{}", std::process::id())));
        debug!(holder = %holder, "Cluster context ready");

        Ok(Self {
            config,
            store,
            holder,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        Arc::clone(&self.store)
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn admin(&self) -> ClusterAdmin {
        ClusterAdmin::new(self.store(), &self.config.coordinator.product, &self.holder)
    }

    /// Orchestrator talking to real nodes over TCP
    pub fn orchestrator(&self) -> SlotMigrationOrchestrator {
        let migration = &self.config.migration;
        let connector = TcpConnector::new(migration.connect_timeout(), migration.io_timeout());
        SlotMigrationOrchestrator::new(
            self.store(),
            Arc::new(connector),
            MigrationSettings::from(migration),
        )
        .with_holder(self.holder.clone())
    }
}
