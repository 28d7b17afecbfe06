/// Migration tasks: "move slots [from_slot, to_slot] to group new_group"

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use super::{GroupId, SlotId};
use crate::error::{MigrateError, MigrateResult};
use crate::utils::generate_id;

/// Task lifecycle: `Pending -> Migrating -> {Finished | Error | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Migrating,
    Finished,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Error | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Migrating => write!(f, "migrating"),
            TaskStatus::Finished => write!(f, "finished"),
            TaskStatus::Error => write!(f, "error"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of migration work.
///
/// The stop token lives outside the status field: an operator may trigger it
/// at any time and the engine observes it at step boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationTask {
    pub id: String,
    #[serde(rename = "from")]
    pub from_slot: SlotId,
    #[serde(rename = "to")]
    pub to_slot: SlotId,
    pub new_group: GroupId,
    /// Throttle between migration steps, in milliseconds
    pub delay_ms: u64,
    pub status: TaskStatus,
    pub percent: u8,
    /// Unix timestamp in seconds
    pub created_at: u64,
    #[serde(skip, default = "CancellationToken::new")]
    stop: CancellationToken,
}

impl MigrationTask {
    pub fn new(
        from_slot: SlotId,
        to_slot: SlotId,
        new_group: GroupId,
        delay_ms: u64,
    ) -> MigrateResult<Self> {
        if from_slot > to_slot {
            return Err(MigrateError::invalid_task(format!(
                "from slot {} is greater than to slot {}",
                from_slot, to_slot
            )));
        }

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Ok(Self {
            id: generate_id("task"),
            from_slot,
            to_slot,
            new_group,
            delay_ms,
            status: TaskStatus::Pending,
            percent: 0,
            created_at,
            stop: CancellationToken::new(),
        })
    }

    /// Number of slots in the inclusive range
    pub fn slot_count(&self) -> u32 {
        self.to_slot - self.from_slot + 1
    }

    /// Ask the running migration to stop at the next step boundary
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Handle that can stop this task from another context
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Record progress after `done` slots; never moves backwards
    pub fn record_progress(&mut self, done: u32) {
        let percent = (u64::from(done) * 100 / u64::from(self.slot_count())).min(100) as u8;
        self.percent = self.percent.max(percent);
    }
}
