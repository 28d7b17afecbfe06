/// Runs migration tasks over a slot range under the cluster lock
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    MigrationPreflightChecker, MigrationSettings, PendingTaskRegistry, PreflightVerdict,
    SingleSlotMigrator,
};
use crate::backend::Connector;
use crate::error::{MigrateError, MigrateResult, ResultExt};
use crate::models::{MigrationTask, SlotId, TaskStatus};
use crate::store::{ClusterLockGuard, CoordinationStore};
use crate::utils::{format_duration, generate_id};

/// Owns everything a migration run needs; build one per process and share it.
pub struct SlotMigrationOrchestrator {
    store: Arc<dyn CoordinationStore>,
    migrator: SingleSlotMigrator,
    preflight: MigrationPreflightChecker,
    registry: PendingTaskRegistry,
    holder: String,
    current: RwLock<Option<MigrationTask>>,
}

impl SlotMigrationOrchestrator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        connector: Arc<dyn Connector>,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            migrator: SingleSlotMigrator::new(Arc::clone(&store), connector, settings),
            preflight: MigrationPreflightChecker::new(Arc::clone(&store)),
            store,
            registry: PendingTaskRegistry::new(),
            holder: generate_id(&format!("shardctl-{}", std::process::id())),
            current: RwLock::new(None),
        }
    }

    /// Identity used for the cluster lock
    pub fn with_holder<S: Into<String>>(mut self, holder: S) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn registry(&self) -> &PendingTaskRegistry {
        &self.registry
    }

    pub async fn preflight(&self, task: &MigrationTask) -> MigrateResult<PreflightVerdict> {
        self.preflight.check(task).await
    }

    /// Latest state of the task being run, or of the last one run
    pub async fn current_task(&self) -> Option<MigrationTask> {
        self.current.read().await.clone()
    }

    /// Signal the running task to stop; false if nothing is running
    pub async fn stop_current(&self) -> bool {
        match self.current.read().await.as_ref() {
            Some(task) if !task.status.is_terminal() => {
                info!(task = %task.id, "Stop requested");
                task.stop();
                true
            }
            _ => false,
        }
    }

    async fn publish(&self, task: &MigrationTask) {
        *self.current.write().await = Some(task.clone());
    }

    /// Run `task` to completion, failure or stop.
    ///
    /// The task ends `Finished`, `Error` or `Cancelled`; a stop is reported as
    /// `StoppedByUser`. Slots already moved stay moved whatever the outcome.
    pub async fn run(&self, task: &mut MigrationTask) -> MigrateResult<()> {
        if task.status != TaskStatus::Pending {
            return Err(MigrateError::invalid_task(format!(
                "task {} is {}, only pending tasks can run",
                task.id, task.status
            )));
        }

        let guard = ClusterLockGuard::acquire(Arc::clone(&self.store), &self.holder).await?;

        task.status = TaskStatus::Migrating;
        self.publish(task).await;
        info!(
            task = %task.id,
            from = task.from_slot,
            to = task.to_slot,
            group = task.new_group,
            delay_ms = task.delay_ms,
            "Migration task started"
        );

        let started = Instant::now();
        let result = self.run_locked(task).await;
        let elapsed = format_duration(started.elapsed());

        task.status = match &result {
            Ok(()) => {
                info!(task = %task.id, elapsed = %elapsed, "Migration task finished");
                TaskStatus::Finished
            }
            Err(e) if e.is_stopped() => {
                info!(task = %task.id, percent = task.percent, elapsed = %elapsed, "Migration task stopped by user");
                TaskStatus::Cancelled
            }
            Err(e) => {
                error!(
                    task = %task.id,
                    percent = task.percent,
                    severity = %e.severity(),
                    "Migration task failed: {}",
                    e
                );
                TaskStatus::Error
            }
        };
        self.publish(task).await;

        let released = guard.release().await.context("release cluster lock");
        match (result, released) {
            (Err(e), Err(unlock)) => {
                warn!("{}", unlock);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), released) => released,
        }
    }

    async fn run_locked(&self, task: &mut MigrationTask) -> MigrateResult<()> {
        self.store
            .require_group(task.new_group)
            .await
            .with_context(|| format!("load destination group {}", task.new_group))?;

        // the whole range must exist before the first slot is touched
        for slot in task.from_slot..=task.to_slot {
            self.store
                .require_slot(slot)
                .await
                .with_context(|| format!("check slot range {}-{}", task.from_slot, task.to_slot))?;
        }

        let delay = Duration::from_millis(task.delay_ms);
        let stop = task.stop_token();

        for (done, slot) in (task.from_slot..=task.to_slot).enumerate() {
            if stop.is_cancelled() {
                info!(task = %task.id, slot, "Stopped before slot");
                return Err(MigrateError::StoppedByUser { slot });
            }

            self.migrate_one(task, slot, delay, &stop).await?;

            task.record_progress(done as u32 + 1);
            self.publish(task).await;
        }
        Ok(())
    }

    async fn migrate_one(
        &self,
        task: &MigrationTask,
        slot_id: SlotId,
        delay: Duration,
        stop: &CancellationToken,
    ) -> MigrateResult<()> {
        let mut slot = self
            .store
            .require_slot(slot_id)
            .await
            .with_context(|| format!("load slot {}", slot_id))?;

        if !slot.status.is_migratable() {
            warn!(slot = slot_id, status = %slot.status, "Slot is neither online nor migrating, skipping");
            return Ok(());
        }

        let from = slot.source_group();
        let to = task.new_group;
        if slot.migrate_status.is_valid() && slot.migrate_status.to != to {
            return Err(MigrateError::MigrationInProgress {
                slot: slot_id,
                to: slot.migrate_status.to,
            });
        }

        for group in [from, to] {
            if !self.store.group_exists(group).await? {
                error!(slot = slot_id, from, to, "Group {} does not exist", group);
                return Err(MigrateError::GroupNotFound { group }
                    .context(format!("migrate slot {} from group {} to {}", slot_id, from, to)));
            }
        }

        if from == to {
            warn!(slot = slot_id, group = to, "Slot already belongs to the target group, skipping");
            return Ok(());
        }

        self.store
            .set_migrate_status(&mut slot, from, to)
            .await
            .with_context(|| format!("mark slot {} migrating", slot_id))?;
        info!(task = %task.id, slot = slot_id, from, to, "Migrating slot");

        let started = Instant::now();
        self.migrator
            .migrate_slot(slot_id, from, to, delay, stop)
            .await
            .with_context(|| format!("migrate slot {} from group {} to {}", slot_id, from, to))?;

        slot.finish_migration(to);
        self.store
            .update_slot(&slot)
            .await
            .with_context(|| format!("mark slot {} online", slot_id))?;
        info!(
            slot = slot_id,
            from,
            to,
            elapsed = %format_duration(started.elapsed()),
            "Slot migrated"
        );
        Ok(())
    }
}
