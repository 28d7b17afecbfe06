/// Per-slot steppers over the data still left on the source master
use tracing::{debug, trace};

use crate::backend::{MigrationConn, Partition};
use crate::config::MigrationMode;
use crate::error::MigrateResult;
use crate::models::{NodeAddr, SlotId};

/// Drains a slot one data-type partition at a time, KV through ZSET.
///
/// A partition counts as drained once a call moves fewer items than the
/// batch size, so an empty partition costs exactly one call.
#[derive(Debug, Clone)]
pub struct DataGroupCycler {
    current: Option<Partition>,
    batch_size: u64,
    timeout_ms: u64,
}

impl DataGroupCycler {
    pub fn new(batch_size: u64, timeout_ms: u64) -> Self {
        Self {
            current: Some(Partition::Kv),
            batch_size,
            timeout_ms,
        }
    }

    /// Partition the next call will move, `None` once the slot is drained
    pub fn current(&self) -> Option<Partition> {
        self.current
    }

    /// Move one batch; returns whether more work remains.
    ///
    /// Errors leave the partition pointer where it was.
    pub async fn advance(
        &mut self,
        conn: &mut dyn MigrationConn,
        slot: SlotId,
        dest: &NodeAddr,
    ) -> MigrateResult<bool> {
        let Some(partition) = self.current else {
            return Ok(false);
        };

        let moved = conn
            .migrate_partition(dest, partition, self.batch_size, slot, self.timeout_ms)
            .await?;
        trace!(slot, %partition, moved, "Migrated batch");

        if moved < self.batch_size {
            debug!(slot, %partition, "Partition drained");
            self.current = partition.next();
        }
        Ok(self.current.is_some())
    }
}

/// Key-wise mode for nodes without partition semantics: SCAN up to
/// `batch_size` keys and MIGRATE each one.
///
/// MIGRATE removes a key from the source, so after a page with keys the scan
/// restarts from cursor 0. The returned cursor is followed only across empty
/// pages. The slot is drained once a SCAN reports cursor 0.
#[derive(Debug, Clone)]
pub struct KeyScanCycler {
    cursor: u64,
    done: bool,
    batch_size: u64,
    timeout_ms: u64,
}

impl KeyScanCycler {
    pub fn new(batch_size: u64, timeout_ms: u64) -> Self {
        Self {
            cursor: 0,
            done: false,
            batch_size,
            timeout_ms,
        }
    }

    /// Cursor the next SCAN starts from
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub async fn advance(
        &mut self,
        conn: &mut dyn MigrationConn,
        slot: SlotId,
        dest: &NodeAddr,
    ) -> MigrateResult<bool> {
        if self.done {
            return Ok(false);
        }

        let (next, keys) = conn.scan(self.cursor, self.batch_size).await?;
        for key in &keys {
            conn.migrate_key(dest, key, slot, self.timeout_ms).await?;
        }
        trace!(slot, cursor = self.cursor, next, keys = keys.len(), "Migrated scan batch");

        self.cursor = if keys.is_empty() { next } else { 0 };
        self.done = next == 0;
        Ok(!self.done)
    }
}

/// The cycler selected by the configured migration mode
#[derive(Debug, Clone)]
pub enum SlotCycler {
    Partition(DataGroupCycler),
    Keywise(KeyScanCycler),
}

impl SlotCycler {
    pub fn new(mode: MigrationMode, batch_size: u64, timeout_ms: u64) -> Self {
        match mode {
            MigrationMode::Partition => {
                SlotCycler::Partition(DataGroupCycler::new(batch_size, timeout_ms))
            }
            MigrationMode::Keywise => {
                SlotCycler::Keywise(KeyScanCycler::new(batch_size, timeout_ms))
            }
        }
    }

    pub async fn advance(
        &mut self,
        conn: &mut dyn MigrationConn,
        slot: SlotId,
        dest: &NodeAddr,
    ) -> MigrateResult<bool> {
        match self {
            SlotCycler::Partition(cycler) => cycler.advance(conn, slot, dest).await,
            SlotCycler::Keywise(cycler) => cycler.advance(conn, slot, dest).await,
        }
    }
}
