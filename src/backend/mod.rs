/// Backend node transport and the migration verbs the engine drives
///
/// The engine only needs three verbs from a data node:
/// - `MIGRATEDB host port TYPE count slot timeout` moves up to `count` items of
///   one data-type partition of a slot and replies with the number moved
/// - `SCAN cursor` lists keys for the key-wise mode
/// - `MIGRATE host port key slot timeout` moves a single key
pub mod conn;
pub mod resp;

pub use conn::{RespConnection, TcpConnector};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::error::MigrateResult;
use crate::models::{NodeAddr, SlotId};

/// Data-type partitions of a slot, drained in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Partition {
    Kv,
    Hash,
    List,
    Set,
    Zset,
}

impl Partition {
    pub const ALL: [Partition; 5] = [
        Partition::Kv,
        Partition::Hash,
        Partition::List,
        Partition::Set,
        Partition::Zset,
    ];

    /// The partition after this one, `None` after ZSET
    pub fn next(self) -> Option<Partition> {
        match self {
            Partition::Kv => Some(Partition::Hash),
            Partition::Hash => Some(Partition::List),
            Partition::List => Some(Partition::Set),
            Partition::Set => Some(Partition::Zset),
            Partition::Zset => None,
        }
    }

    /// Name sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Kv => "KV",
            Partition::Hash => "HASH",
            Partition::List => "LIST",
            Partition::Set => "SET",
            Partition::Zset => "ZSET",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open connection to a source master
#[async_trait]
pub trait MigrationConn: Send {
    /// Move up to `count` items of `partition` in `slot` to `dest`; returns items moved
    async fn migrate_partition(
        &mut self,
        dest: &NodeAddr,
        partition: Partition,
        count: u64,
        slot: SlotId,
        timeout_ms: u64,
    ) -> MigrateResult<u64>;

    /// One `SCAN cursor COUNT count` step; returns the next cursor (0 when done)
    /// and a batch of keys
    async fn scan(&mut self, cursor: u64, count: u64) -> MigrateResult<(u64, Vec<Bytes>)>;

    /// Move one key to `dest`
    async fn migrate_key(
        &mut self,
        dest: &NodeAddr,
        key: &[u8],
        slot: SlotId,
        timeout_ms: u64,
    ) -> MigrateResult<()>;
}

/// Opens connections to backend nodes
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> MigrateResult<Box<dyn MigrationConn>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_order() {
        let mut seen = vec![Partition::Kv];
        let mut current = Partition::Kv;
        while let Some(next) = current.next() {
            assert!(next > current);
            seen.push(next);
            current = next;
        }
        assert_eq!(seen, Partition::ALL);
    }

    #[test]
    fn test_partition_wire_names() {
        let names: Vec<_> = Partition::ALL.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, ["KV", "HASH", "LIST", "SET", "ZSET"]);
    }
}
