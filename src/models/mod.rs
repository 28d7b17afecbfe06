/// Cluster metadata types shared by the store, the CLI and the migration engine
pub mod group;
pub mod slot;
pub mod task;

pub use group::{NodeAddr, Server, ServerGroup, ServerRole};
pub use slot::{MigrateStatus, Slot, SlotStatus};
pub use task::{MigrationTask, TaskStatus};

/// Slot number, `0 <= id < slot_num`
pub type SlotId = u32;

/// Server group (replica set) identifier
pub type GroupId = i64;

/// Sentinel for "no group", used by unassigned slots and cleared migrate status
pub const INVALID_ID: GroupId = -1;
