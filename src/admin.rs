/// Operator commands over slot and group metadata
///
/// Every mutation takes the cluster lock so it cannot interleave with a
/// migration run from another process.
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{MigrateError, MigrateResult, ResultExt};
use crate::models::{GroupId, NodeAddr, ServerGroup, ServerRole, Slot, SlotId, SlotStatus};
use crate::store::{ClusterLockGuard, CoordinationStore};

pub struct ClusterAdmin {
    store: Arc<dyn CoordinationStore>,
    product: String,
    holder: String,
}

impl ClusterAdmin {
    pub fn new(store: Arc<dyn CoordinationStore>, product: &str, holder: &str) -> Self {
        Self {
            store,
            product: product.to_string(),
            holder: holder.to_string(),
        }
    }

    async fn locked<T, F, Fut>(&self, f: F) -> MigrateResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MigrateResult<T>>,
    {
        let guard = ClusterLockGuard::acquire(Arc::clone(&self.store), &self.holder).await?;
        let result = f().await;
        let released = guard.release().await.context("release cluster lock");
        let value = result?;
        released?;
        Ok(value)
    }

    pub async fn init_slots(&self, slot_num: u32, force: bool) -> MigrateResult<()> {
        self.locked(|| self.store.init_slots(slot_num, force))
            .await
            .context("init slots")?;
        info!(slot_num, force, "Initialized slots");
        Ok(())
    }

    pub async fn slot_info(&self, id: SlotId) -> MigrateResult<Slot> {
        self.store.require_slot(id).await
    }

    pub async fn set_slot(&self, id: SlotId, group: GroupId, status: SlotStatus) -> MigrateResult<()> {
        self.set_slot_range(id, id, group, status).await
    }

    pub async fn set_slot_range(
        &self,
        from: SlotId,
        to: SlotId,
        group: GroupId,
        status: SlotStatus,
    ) -> MigrateResult<()> {
        self.locked(|| self.store.set_slot_range(from, to, group, status))
            .await
            .with_context(|| format!("set slots {}-{}", from, to))?;
        info!(from, to, group, %status, "Updated slot range");
        Ok(())
    }

    pub async fn list_groups(&self) -> MigrateResult<Vec<ServerGroup>> {
        self.store.list_groups().await
    }

    /// Add a server, creating its group on first use.
    ///
    /// Without an explicit role the first server of a group becomes master
    /// and later ones replicas. Adding a member twice changes nothing.
    pub async fn add_server(
        &self,
        group_id: GroupId,
        addr: &str,
        role: Option<ServerRole>,
    ) -> MigrateResult<ServerGroup> {
        addr.parse::<NodeAddr>()?;

        self.locked(move || async move {
            let mut group = self
                .store
                .load_group(group_id)
                .await?
                .unwrap_or_else(|| ServerGroup::new(&self.product, group_id));

            let role = role.unwrap_or(if group.master().is_some() {
                ServerRole::Slave
            } else {
                ServerRole::Master
            });
            if !group.add_server(addr, role) {
                info!(group = group_id, addr, "Server already in group");
                return Ok(group);
            }

            self.store.update_group(&group).await?;
            info!(group = group_id, addr, %role, "Added server");
            Ok::<_, MigrateError>(group)
        })
        .await
        .with_context(|| format!("add server {} to group {}", addr, group_id))
    }

    /// Remove a server; returns false if it was not a member
    pub async fn remove_server(&self, group_id: GroupId, addr: &str) -> MigrateResult<bool> {
        self.locked(move || async move {
            let mut group = self.store.require_group(group_id).await?;
            if group.servers.is_empty() {
                return Err(MigrateError::store(
                    "remove server",
                    format!("group {} has no server", group_id),
                ));
            }
            if group.remove_server(addr).is_none() {
                return Ok(false);
            }

            self.store.update_group(&group).await?;
            info!(group = group_id, addr, "Removed server");
            Ok::<_, MigrateError>(true)
        })
        .await
        .with_context(|| format!("remove server {} from group {}", addr, group_id))
    }

    /// Holder of the cluster lock, `None` while it is free
    pub async fn lock_owner(&self) -> MigrateResult<Option<String>> {
        self.store.lock_owner().await
    }

    /// Break a cluster lock left behind by a process that died holding it.
    ///
    /// Returns the evicted holder. Only safe once that process is known dead.
    pub async fn force_unlock(&self) -> MigrateResult<Option<String>> {
        let evicted = self.store.force_unlock().await.context("force unlock")?;
        match &evicted {
            Some(holder) => warn!(holder = %holder, by = %self.holder, "Broke cluster lock"),
            None => info!("Cluster lock was already free"),
        }
        Ok(evicted)
    }

    pub async fn remove_group(&self, group_id: GroupId) -> MigrateResult<()> {
        self.locked(|| self.store.delete_group(group_id))
            .await
            .with_context(|| format!("remove group {}", group_id))?;
        info!(group = group_id, "Removed group");
        Ok(())
    }
}
