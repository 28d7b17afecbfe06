/// Slot migration engine
///
/// Layers, leaf first:
/// - `cycler` steps through the data of one slot, one migration verb per step
/// - `slot` resolves both masters and drives a cycler until the slot is empty
/// - `preflight` refuses tasks that conflict with a migration already in flight
/// - `orchestrator` runs a task over a slot range under the cluster lock
/// - `registry` queues tasks for a scheduler that runs them later
pub mod cycler;
pub mod orchestrator;
pub mod preflight;
pub mod registry;
pub mod slot;

pub use cycler::{DataGroupCycler, KeyScanCycler, SlotCycler};
pub use orchestrator::SlotMigrationOrchestrator;
pub use preflight::{MigrationPreflightChecker, PreflightVerdict};
pub use registry::PendingTaskRegistry;
pub use slot::SingleSlotMigrator;

use std::time::Duration;

use crate::config::{MigrationConfig, MigrationMode};

/// Engine tuning, resolved from `MigrationConfig`
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub mode: MigrationMode,
    pub batch_size: u64,
    pub migrate_timeout_ms: u64,
    pub master_wait: Duration,
    pub master_retry_initial: Duration,
    pub master_retry_max: Duration,
    pub progress_every: u64,
}

impl From<&MigrationConfig> for MigrationSettings {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            mode: config.mode,
            batch_size: config.batch_size.max(1),
            migrate_timeout_ms: config.migrate_timeout_ms,
            master_wait: config.master_wait(),
            master_retry_initial: Duration::from_millis(config.master_retry_initial_ms),
            master_retry_max: Duration::from_millis(config.master_retry_max_ms),
            progress_every: config.progress_every.max(1),
        }
    }
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self::from(&MigrationConfig::default())
    }
}
