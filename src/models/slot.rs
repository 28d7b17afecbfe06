/// Slot metadata and its migration state

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{GroupId, SlotId, INVALID_ID};

/// Lifecycle status of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotStatus {
    Online,
    Offline,
    Migrating,
    PendingMigrate,
}

impl SlotStatus {
    /// Only online slots, and slots whose migration was interrupted, can be migrated
    pub fn is_migratable(&self) -> bool {
        matches!(self, SlotStatus::Online | SlotStatus::Migrating)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Online => write!(f, "online"),
            SlotStatus::Offline => write!(f, "offline"),
            SlotStatus::Migrating => write!(f, "migrating"),
            SlotStatus::PendingMigrate => write!(f, "pending-migrate"),
        }
    }
}

impl FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(SlotStatus::Online),
            "offline" => Ok(SlotStatus::Offline),
            "migrating" | "migrate" => Ok(SlotStatus::Migrating),
            "pending-migrate" | "pre_migrate" => Ok(SlotStatus::PendingMigrate),
            _ => Err(format!("Unknown slot status: {}", s)),
        }
    }
}

/// Owning groups of a slot while it is being migrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateStatus {
    pub from: GroupId,
    pub to: GroupId,
}

impl MigrateStatus {
    pub fn new(from: GroupId, to: GroupId) -> Self {
        Self { from, to }
    }

    pub fn invalid() -> Self {
        Self {
            from: INVALID_ID,
            to: INVALID_ID,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.from != INVALID_ID && self.to != INVALID_ID
    }
}

impl Default for MigrateStatus {
    fn default() -> Self {
        Self::invalid()
    }
}

/// One shard unit of the keyspace.
///
/// `migrate_status` is valid if and only if `status == Migrating`; the
/// transition helpers below are the only way the engine changes either field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub product: String,
    pub group_id: GroupId,
    pub status: SlotStatus,
    #[serde(default)]
    pub migrate_status: MigrateStatus,
}

impl Slot {
    pub fn new(product: &str, id: SlotId) -> Self {
        Self {
            id,
            product: product.to_string(),
            group_id: INVALID_ID,
            status: SlotStatus::Offline,
            migrate_status: MigrateStatus::invalid(),
        }
    }

    /// Group the data of this slot currently lives on
    pub fn source_group(&self) -> GroupId {
        if self.status == SlotStatus::Migrating {
            self.migrate_status.from
        } else {
            self.group_id
        }
    }

    /// Record the intent to move this slot before any data moves.
    ///
    /// Ownership switches to the destination immediately so new writes land
    /// there; readers consult `migrate_status.from` for keys not yet moved.
    pub fn begin_migration(&mut self, from: GroupId, to: GroupId) {
        self.status = SlotStatus::Migrating;
        self.group_id = to;
        self.migrate_status = MigrateStatus::new(from, to);
    }

    /// Mark the slot as fully owned by `to`
    pub fn finish_migration(&mut self, to: GroupId) {
        self.status = SlotStatus::Online;
        self.group_id = to;
        self.migrate_status = MigrateStatus::invalid();
    }

    pub fn is_consistent(&self) -> bool {
        (self.status == SlotStatus::Migrating) == self.migrate_status.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            SlotStatus::Online,
            SlotStatus::Offline,
            SlotStatus::Migrating,
            SlotStatus::PendingMigrate,
        ] {
            assert_eq!(status.to_string().parse::<SlotStatus>().unwrap(), status);
        }
        assert_eq!("migrate".parse::<SlotStatus>().unwrap(), SlotStatus::Migrating);
        assert!("broken".parse::<SlotStatus>().is_err());
    }

    #[test]
    fn test_status_serde_name() {
        let json = serde_json::to_string(&SlotStatus::PendingMigrate).unwrap();
        assert_eq!(json, "\"pending-migrate\"");
    }

    #[test]
    fn test_migration_transitions_keep_invariant() {
        let mut slot = Slot::new("test", 4);
        slot.group_id = 1;
        slot.status = SlotStatus::Online;
        assert!(slot.is_consistent());
        assert_eq!(slot.source_group(), 1);

        slot.begin_migration(1, 2);
        assert!(slot.is_consistent());
        assert_eq!(slot.status, SlotStatus::Migrating);
        assert_eq!(slot.source_group(), 1);

        slot.finish_migration(2);
        assert!(slot.is_consistent());
        assert_eq!(slot.group_id, 2);
        assert!(!slot.migrate_status.is_valid());
    }
}
