/// Migration of a single slot between two groups
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MigrationSettings, SlotCycler};
use crate::backend::Connector;
use crate::error::{MigrateError, MigrateResult, ResultExt};
use crate::models::{GroupId, NodeAddr, Server, SlotId};
use crate::store::CoordinationStore;
use crate::utils::Backoff;

pub struct SingleSlotMigrator {
    store: Arc<dyn CoordinationStore>,
    connector: Arc<dyn Connector>,
    settings: MigrationSettings,
}

impl SingleSlotMigrator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        connector: Arc<dyn Connector>,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            store,
            connector,
            settings,
        }
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Move every item of `slot` from the master of `from` to the master of `to`.
    ///
    /// The stop token is checked before each step; a stop yields
    /// `StoppedByUser` and leaves the slot half moved. One connection to the
    /// source master is held for the whole slot and closed on every exit.
    pub async fn migrate_slot(
        &self,
        slot: SlotId,
        from: GroupId,
        to: GroupId,
        delay: Duration,
        stop: &CancellationToken,
    ) -> MigrateResult<()> {
        self.store
            .require_group(from)
            .await
            .with_context(|| format!("load from group {}", from))?;
        self.store
            .require_group(to)
            .await
            .with_context(|| format!("load to group {}", to))?;

        let (source, target) = self.resolve_masters(slot, from, to, stop).await?;
        let dest: NodeAddr = target.addr.parse()?;

        let mut conn = self
            .connector
            .connect(&source.addr)
            .await
            .with_context(|| format!("connect to master {} of group {}", source.addr, from))?;
        debug!(slot, source = %source.addr, dest = %dest, "Connected to source master");

        let mut cycler = SlotCycler::new(
            self.settings.mode,
            self.settings.batch_size,
            self.settings.migrate_timeout_ms,
        );
        let mut steps: u64 = 0;

        loop {
            if stop.is_cancelled() {
                info!(slot, steps, "Slot migration stopped by user");
                return Err(MigrateError::StoppedByUser { slot });
            }

            let more = cycler
                .advance(conn.as_mut(), slot, &dest)
                .await
                .with_context(|| format!("migrate slot {} from {} to {}", slot, source.addr, dest))?;
            steps += 1;

            if !more {
                break;
            }
            if steps % self.settings.progress_every.max(1) == 0 {
                info!(slot, steps, "Slot still migrating");
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = sleep(delay) => {}
                }
            }
        }

        debug!(slot, steps, "Slot drained");
        Ok(())
    }

    /// Wait until both groups have a master, bounded by `master_wait`.
    ///
    /// A group without a master is retried with backoff; store errors fail
    /// immediately.
    pub async fn resolve_masters(
        &self,
        slot: SlotId,
        from: GroupId,
        to: GroupId,
        stop: &CancellationToken,
    ) -> MigrateResult<(Server, Server)> {
        let deadline = Instant::now() + self.settings.master_wait;
        let mut backoff = Backoff::new(
            self.settings.master_retry_initial,
            self.settings.master_retry_max,
        );
        let mut from_master = None;
        let mut to_master = None;

        loop {
            if from_master.is_none() {
                from_master = self.store.master(from).await?;
            }
            if to_master.is_none() {
                to_master = self.store.master(to).await?;
            }
            if let (Some(source), Some(target)) = (&from_master, &to_master) {
                return Ok((source.clone(), target.clone()));
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    slot,
                    from,
                    to,
                    from_ready = from_master.is_some(),
                    to_ready = to_master.is_some(),
                    "Gave up waiting for group masters"
                );
                return Err(MigrateError::GroupMasterNotFound { from, to });
            }

            let wait = backoff.next_delay().min(deadline - now);
            debug!(slot, from, to, wait_ms = wait.as_millis() as u64, "Waiting for group master");
            tokio::select! {
                _ = stop.cancelled() => {
                    info!(slot, "Stopped while waiting for group masters");
                    return Err(MigrateError::StoppedByUser { slot });
                }
                _ = sleep(wait) => {}
            }
        }
    }
}
