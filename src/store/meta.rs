/// Serializable snapshot of cluster metadata
///
/// Both stores hold a `ClusterMeta` and delegate their mutations to it, so
/// validation rules live in one place.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MigrateError, MigrateResult};
use crate::models::{GroupId, Server, ServerGroup, Slot, SlotId, SlotStatus, INVALID_ID};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMeta {
    pub product: String,
    #[serde(default)]
    pub slots: BTreeMap<SlotId, Slot>,
    #[serde(default)]
    pub groups: BTreeMap<GroupId, ServerGroup>,
}

impl ClusterMeta {
    pub fn new(product: &str) -> Self {
        Self {
            product: product.to_string(),
            ..Default::default()
        }
    }

    pub fn group(&self, id: GroupId) -> Option<&ServerGroup> {
        self.groups.get(&id)
    }

    pub fn master(&self, id: GroupId) -> Option<&Server> {
        self.groups.get(&id)?.master()
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn list_groups(&self) -> Vec<ServerGroup> {
        self.groups.values().cloned().collect()
    }

    pub fn update_group(&mut self, group: &ServerGroup) {
        self.groups.insert(group.id, group.clone());
    }

    /// Remove a group; refused while any slot still lives on it
    pub fn delete_group(&mut self, id: GroupId) -> MigrateResult<()> {
        if !self.groups.contains_key(&id) {
            return Err(MigrateError::GroupNotFound { group: id });
        }

        let in_use = self.slots.values().find(|s| {
            (s.group_id == id && s.status != SlotStatus::Offline)
                || (s.migrate_status.is_valid()
                    && (s.migrate_status.from == id || s.migrate_status.to == id))
        });
        if let Some(slot) = in_use {
            return Err(MigrateError::store(
                "delete group",
                format!("group {} still serves slot {}", id, slot.id),
            ));
        }

        self.groups.remove(&id);
        Ok(())
    }

    pub fn update_slot(&mut self, slot: &Slot) -> MigrateResult<()> {
        if !slot.is_consistent() {
            return Err(MigrateError::inconsistent(format!(
                "slot {} is {} with migrate status {}->{}",
                slot.id, slot.status, slot.migrate_status.from, slot.migrate_status.to
            )));
        }
        self.slots.insert(slot.id, slot.clone());
        Ok(())
    }

    pub fn migrating_slots(&self) -> Vec<Slot> {
        self.slots
            .values()
            .filter(|s| s.status == SlotStatus::Migrating)
            .cloned()
            .collect()
    }

    pub fn init_slots(&mut self, slot_num: u32, force: bool) -> MigrateResult<()> {
        if slot_num == 0 {
            return Err(MigrateError::store("init slots", "slot count must be positive"));
        }
        if !self.slots.is_empty() && !force {
            return Err(MigrateError::store(
                "init slots",
                format!("{} slots already exist, use force to reset", self.slots.len()),
            ));
        }

        let product = self.product.clone();
        self.slots = (0..slot_num).map(|id| (id, Slot::new(&product, id))).collect();
        Ok(())
    }

    /// Assign every slot in `[from, to]` to `group` with `status`
    pub fn set_slot_range(
        &mut self,
        from: SlotId,
        to: SlotId,
        group: GroupId,
        status: SlotStatus,
    ) -> MigrateResult<()> {
        if from > to {
            return Err(MigrateError::store(
                "set slot range",
                format!("invalid range {}-{}", from, to),
            ));
        }
        if status == SlotStatus::Migrating {
            return Err(MigrateError::store(
                "set slot range",
                "migrating status is set by the migration engine only",
            ));
        }
        if status != SlotStatus::Offline && !self.groups.contains_key(&group) {
            return Err(MigrateError::GroupNotFound { group });
        }
        if let Some(missing) = (from..=to).find(|id| !self.slots.contains_key(id)) {
            return Err(MigrateError::SlotNotFound { slot: missing });
        }

        let group = if status == SlotStatus::Offline && !self.groups.contains_key(&group) {
            INVALID_ID
        } else {
            group
        };
        for id in from..=to {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.finish_migration(group);
                slot.status = status;
            }
        }
        Ok(())
    }
}
