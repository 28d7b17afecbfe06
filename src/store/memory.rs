/// In-process coordination store
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{ClusterMeta, CoordinationStore};
use crate::error::{MigrateError, MigrateResult};
use crate::models::{GroupId, ServerGroup, Slot, SlotId, SlotStatus};

/// Metadata and lock held in memory; cloning a snapshot is cheap enough for tests
pub struct MemoryStore {
    meta: RwLock<ClusterMeta>,
    lock_holder: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new(product: &str) -> Self {
        Self::from_meta(ClusterMeta::new(product))
    }

    pub fn from_meta(meta: ClusterMeta) -> Self {
        Self {
            meta: RwLock::new(meta),
            lock_holder: Mutex::new(None),
        }
    }

    /// Copy of the current metadata
    pub async fn snapshot(&self) -> ClusterMeta {
        self.meta.read().await.clone()
    }

    /// Current lock holder, if any
    pub async fn lock_holder(&self) -> Option<String> {
        self.lock_holder.lock().await.clone()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn lock(&self, holder: &str) -> MigrateResult<()> {
        let mut current = self.lock_holder.lock().await;
        if let Some(existing) = current.as_ref() {
            return Err(MigrateError::ClusterLocked {
                holder: existing.clone(),
            });
        }
        *current = Some(holder.to_string());
        debug!(holder, "Cluster lock taken");
        Ok(())
    }

    async fn unlock(&self, holder: &str) -> MigrateResult<()> {
        let mut current = self.lock_holder.lock().await;
        match current.as_deref() {
            None => Ok(()),
            Some(existing) if existing == holder => {
                *current = None;
                debug!(holder, "Cluster lock dropped");
                Ok(())
            }
            Some(existing) => Err(MigrateError::store(
                "unlock",
                format!("lock is held by {}, not {}", existing, holder),
            )),
        }
    }

    async fn lock_owner(&self) -> MigrateResult<Option<String>> {
        Ok(self.lock_holder().await)
    }

    async fn force_unlock(&self) -> MigrateResult<Option<String>> {
        let evicted = self.lock_holder.lock().await.take();
        if let Some(holder) = &evicted {
            debug!(holder = %holder, "Cluster lock broken");
        }
        Ok(evicted)
    }

    async fn load_group(&self, id: GroupId) -> MigrateResult<Option<ServerGroup>> {
        Ok(self.meta.read().await.group(id).cloned())
    }

    async fn list_groups(&self) -> MigrateResult<Vec<ServerGroup>> {
        Ok(self.meta.read().await.list_groups())
    }

    async fn update_group(&self, group: &ServerGroup) -> MigrateResult<()> {
        self.meta.write().await.update_group(group);
        Ok(())
    }

    async fn delete_group(&self, id: GroupId) -> MigrateResult<()> {
        self.meta.write().await.delete_group(id)
    }

    async fn get_slot(&self, id: SlotId) -> MigrateResult<Option<Slot>> {
        Ok(self.meta.read().await.slot(id).cloned())
    }

    async fn update_slot(&self, slot: &Slot) -> MigrateResult<()> {
        self.meta.write().await.update_slot(slot)
    }

    async fn migrating_slots(&self) -> MigrateResult<Vec<Slot>> {
        Ok(self.meta.read().await.migrating_slots())
    }

    async fn init_slots(&self, slot_num: u32, force: bool) -> MigrateResult<()> {
        self.meta.write().await.init_slots(slot_num, force)
    }

    async fn set_slot_range(
        &self,
        from: SlotId,
        to: SlotId,
        group: GroupId,
        status: SlotStatus,
    ) -> MigrateResult<()> {
        self.meta
            .write()
            .await
            .set_slot_range(from, to, group, status)
    }
}
