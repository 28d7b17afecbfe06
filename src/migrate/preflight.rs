/// Admission check run before a migration task starts
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{MigrateError, MigrateResult, ResultExt};
use crate::models::{MigrationTask, SlotId};
use crate::store::CoordinationStore;

/// Outcome of a successful preflight check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightVerdict {
    /// Nothing is migrating
    Clear,
    /// The task resumes the single slot already migrating to its group
    Reattach { slot: SlotId },
}

pub struct MigrationPreflightChecker {
    store: Arc<dyn CoordinationStore>,
}

impl MigrationPreflightChecker {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// At most one slot may be migrating cluster-wide. If one is, the task
    /// must target exactly that slot and its destination group.
    pub async fn check(&self, task: &MigrationTask) -> MigrateResult<PreflightVerdict> {
        let migrating = self
            .store
            .migrating_slots()
            .await
            .context("list migrating slots")?;

        match migrating.as_slice() {
            [] => Ok(PreflightVerdict::Clear),
            [slot] => {
                let to = slot.migrate_status.to;
                if slot.id == task.from_slot && slot.id == task.to_slot && to == task.new_group {
                    info!(slot = slot.id, to, task = %task.id, "Resuming interrupted slot migration");
                    Ok(PreflightVerdict::Reattach { slot: slot.id })
                } else {
                    warn!(slot = slot.id, to, task = %task.id, "Another slot migration is in flight");
                    Err(MigrateError::MigrationInProgress { slot: slot.id, to })
                }
            }
            slots => {
                let ids: Vec<String> = slots.iter().map(|s| s.id.to_string()).collect();
                Err(MigrateError::inconsistent(format!(
                    "{} slots are migrating at once: {}",
                    slots.len(),
                    ids.join(", ")
                )))
            }
        }
    }
}
