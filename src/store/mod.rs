/// Coordination store: cluster lock plus slot and group metadata
///
/// The migration engine only talks to the store through `CoordinationStore`.
/// Two implementations ship with the crate: `FileStore` keeps metadata in a
/// directory shared by every operator process, `MemoryStore` keeps it in
/// process for tests and embedders.
pub mod file;
pub mod memory;
pub mod meta;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use meta::ClusterMeta;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{CoordinatorConfig, CoordinatorKind};
use crate::error::{MigrateError, MigrateResult};
use crate::models::{GroupId, Server, ServerGroup, Slot, SlotId, SlotStatus};

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Take the cluster-wide lock; fails with `ClusterLocked` if someone holds it
    async fn lock(&self, holder: &str) -> MigrateResult<()>;

    /// Release the lock if `holder` owns it; releasing a free lock is a no-op
    async fn unlock(&self, holder: &str) -> MigrateResult<()>;

    /// Current lock holder, `None` while the lock is free
    async fn lock_owner(&self) -> MigrateResult<Option<String>>;

    /// Release the lock whoever holds it; returns the evicted holder.
    ///
    /// Recovery for a holder that died without unlocking.
    async fn force_unlock(&self) -> MigrateResult<Option<String>>;

    async fn load_group(&self, id: GroupId) -> MigrateResult<Option<ServerGroup>>;

    async fn list_groups(&self) -> MigrateResult<Vec<ServerGroup>>;

    async fn update_group(&self, group: &ServerGroup) -> MigrateResult<()>;

    async fn delete_group(&self, id: GroupId) -> MigrateResult<()>;

    async fn get_slot(&self, id: SlotId) -> MigrateResult<Option<Slot>>;

    async fn update_slot(&self, slot: &Slot) -> MigrateResult<()>;

    async fn migrating_slots(&self) -> MigrateResult<Vec<Slot>>;

    /// Create slots `0..slot_num` offline and unassigned
    async fn init_slots(&self, slot_num: u32, force: bool) -> MigrateResult<()>;

    async fn set_slot_range(
        &self,
        from: SlotId,
        to: SlotId,
        group: GroupId,
        status: SlotStatus,
    ) -> MigrateResult<()>;

    async fn group_exists(&self, id: GroupId) -> MigrateResult<bool> {
        Ok(self.load_group(id).await?.is_some())
    }

    /// Current master of a group, `None` while no master is elected
    async fn master(&self, group: GroupId) -> MigrateResult<Option<Server>> {
        let group = self.require_group(group).await?;
        Ok(group.master().cloned())
    }

    async fn require_group(&self, id: GroupId) -> MigrateResult<ServerGroup> {
        self.load_group(id)
            .await?
            .ok_or(MigrateError::GroupNotFound { group: id })
    }

    async fn require_slot(&self, id: SlotId) -> MigrateResult<Slot> {
        self.get_slot(id)
            .await?
            .ok_or(MigrateError::SlotNotFound { slot: id })
    }

    /// Persist the intent to move `slot` from `from` to `to`
    async fn set_migrate_status(
        &self,
        slot: &mut Slot,
        from: GroupId,
        to: GroupId,
    ) -> MigrateResult<()> {
        slot.begin_migration(from, to);
        self.update_slot(slot).await
    }
}

/// Open the store described by the configuration
pub async fn open_store(config: &CoordinatorConfig) -> MigrateResult<Arc<dyn CoordinationStore>> {
    match config.kind {
        CoordinatorKind::File => {
            let store = FileStore::open(&config.path, &config.product).await?;
            Ok(Arc::new(store))
        }
        CoordinatorKind::Memory => {
            warn!("Using in-memory coordinator, metadata will not survive this process");
            Ok(Arc::new(MemoryStore::new(&config.product)))
        }
    }
}

/// Holds the cluster lock until released or dropped.
///
/// Dropping the guard without `release` (early return, panic, aborted task)
/// schedules the unlock on the current runtime so the lock is not leaked.
pub struct ClusterLockGuard {
    store: Arc<dyn CoordinationStore>,
    holder: String,
    released: bool,
}

impl ClusterLockGuard {
    pub async fn acquire(store: Arc<dyn CoordinationStore>, holder: &str) -> MigrateResult<Self> {
        store.lock(holder).await?;
        info!(holder, "Acquired cluster lock");
        Ok(Self {
            store,
            holder: holder.to_string(),
            released: false,
        })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn release(mut self) -> MigrateResult<()> {
        let result = self.store.unlock(&self.holder).await;
        self.released = true;
        if result.is_ok() {
            info!(holder = %self.holder, "Released cluster lock");
        }
        result
    }
}

impl Drop for ClusterLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let holder = std::mem::take(&mut self.holder);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match store.unlock(&holder).await {
                        Ok(()) => info!(holder, "Released cluster lock on unwind"),
                        Err(e) => warn!(holder, "Failed to release cluster lock: {}", e),
                    }
                });
            }
            Err(_) => warn!(holder, "No runtime available, cluster lock left held"),
        }
    }
}
