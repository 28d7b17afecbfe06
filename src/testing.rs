//! Scripted backend and cluster builders shared by the unit tests, the
//! integration tests and the benches. Built with `cfg(test)` or the
//! `test-util` feature.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::backend::{Connector, MigrationConn, Partition};
use crate::error::{MigrateError, MigrateResult};
use crate::models::{GroupId, NodeAddr, ServerGroup, ServerRole, SlotId, SlotStatus};
use crate::store::{CoordinationStore, MemoryStore};

pub const PRODUCT: &str = "test";

/// One request seen by the scripted backend
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(String),
    MigrateDb {
        dest: String,
        partition: Partition,
        slot: SlotId,
    },
    Scan {
        cursor: u64,
        count: u64,
    },
    MigrateKey {
        key: Bytes,
        slot: SlotId,
    },
}

type ReplyFn = dyn Fn(Partition, SlotId) -> MigrateResult<u64> + Send + Sync;
type HookFn = dyn Fn(&Call) + Send + Sync;

/// Backend double. MIGRATEDB replays queued replies first, then falls back to
/// a reply function. Every call is recorded, and the slot status in the store
/// can be noted at call time.
#[derive(Clone)]
pub struct ScriptedConnector {
    calls: Arc<Mutex<Vec<Call>>>,
    observed: Arc<Mutex<Vec<(SlotId, SlotStatus)>>>,
    replies: Arc<Mutex<VecDeque<MigrateResult<u64>>>>,
    scans: Arc<Mutex<VecDeque<(u64, Vec<Bytes>)>>>,
    reply: Arc<ReplyFn>,
    hook: Option<Arc<HookFn>>,
    store: Option<Arc<MemoryStore>>,
}

impl ScriptedConnector {
    /// Every MIGRATEDB call moves `moved` items
    pub fn constant(moved: u64) -> Self {
        Self::with_reply(move |_, _| Ok(moved))
    }

    pub fn with_reply<F>(reply: F) -> Self
    where
        F: Fn(Partition, SlotId) -> MigrateResult<u64> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            observed: Arc::new(Mutex::new(Vec::new())),
            replies: Arc::new(Mutex::new(VecDeque::new())),
            scans: Arc::new(Mutex::new(VecDeque::new())),
            reply: Arc::new(reply),
            hook: None,
            store: None,
        }
    }

    /// Run `hook` after every recorded call
    pub fn on_call<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Call) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Record the slot status seen by each MIGRATEDB call
    pub fn observing(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Answer the next MIGRATEDB with `reply`
    pub fn push_reply(&self, reply: MigrateResult<u64>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Answer the next SCAN with `next` and `keys`; an empty queue ends the scan
    pub fn push_scan(&self, next: u64, keys: &[&'static str]) {
        let keys = keys.iter().map(|k| Bytes::from_static(k.as_bytes())).collect();
        self.scans.lock().unwrap().push_back((next, keys));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn migrate_calls(&self) -> Vec<(Partition, SlotId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::MigrateDb {
                    partition, slot, ..
                } => Some((partition, slot)),
                _ => None,
            })
            .collect()
    }

    pub fn calls_for_slot(&self, slot: SlotId) -> Vec<Partition> {
        self.migrate_calls()
            .into_iter()
            .filter(|(_, s)| *s == slot)
            .map(|(p, _)| p)
            .collect()
    }

    pub fn observed(&self) -> Vec<(SlotId, SlotStatus)> {
        self.observed.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call.clone());
        if let Some(hook) = &self.hook {
            hook(&call);
        }
    }
}

#[async_trait]
impl MigrationConn for ScriptedConnector {
    async fn migrate_partition(
        &mut self,
        dest: &NodeAddr,
        partition: Partition,
        _count: u64,
        slot: SlotId,
        _timeout_ms: u64,
    ) -> MigrateResult<u64> {
        if let Some(store) = &self.store {
            if let Some(current) = store.get_slot(slot).await? {
                self.observed.lock().unwrap().push((slot, current.status));
            }
        }
        self.record(Call::MigrateDb {
            dest: dest.to_string(),
            partition,
            slot,
        });
        let queued = self.replies.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| (self.reply)(partition, slot))
    }

    async fn scan(&mut self, cursor: u64, count: u64) -> MigrateResult<(u64, Vec<Bytes>)> {
        self.record(Call::Scan { cursor, count });
        let next = self.scans.lock().unwrap().pop_front();
        Ok(next.unwrap_or((0, Vec::new())))
    }

    async fn migrate_key(
        &mut self,
        _dest: &NodeAddr,
        key: &[u8],
        slot: SlotId,
        _timeout_ms: u64,
    ) -> MigrateResult<()> {
        self.record(Call::MigrateKey {
            key: Bytes::copy_from_slice(key),
            slot,
        });
        Ok(())
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    /// Addresses starting with `unreachable` time out
    async fn connect(&self, addr: &str) -> MigrateResult<Box<dyn MigrationConn>> {
        self.record(Call::Connect(addr.to_string()));
        if addr.starts_with("unreachable") {
            return Err(MigrateError::timeout(format!("connect to {}", addr)));
        }
        Ok(Box::new(self.clone()))
    }
}

/// Master address used for a group in the fixtures
pub fn master_addr(group: GroupId) -> String {
    format!("10.0.{}.1:6380", group)
}

/// Store `group` with one server at `master_addr`, as master or slave
pub async fn add_group(store: &MemoryStore, id: GroupId, with_master: bool) {
    let mut group = ServerGroup::new(PRODUCT, id);
    let role = if with_master {
        ServerRole::Master
    } else {
        ServerRole::Slave
    };
    group.add_server(&master_addr(id), role);
    store.update_group(&group).await.unwrap();
}

/// `slot_num` slots all online on `owner`, plus the listed groups
pub async fn cluster(slot_num: u32, owner: GroupId, groups: &[GroupId]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(PRODUCT));
    add_group(&store, owner, true).await;
    for id in groups {
        add_group(&store, *id, true).await;
    }
    store.init_slots(slot_num, false).await.unwrap();
    store
        .set_slot_range(0, slot_num - 1, owner, SlotStatus::Online)
        .await
        .unwrap();
    store
}
