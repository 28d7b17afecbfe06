use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

use shardctl::backend::resp::{RespEncoder, RespParser};
use shardctl::backend::{Connector, MigrationConn, Partition};
use shardctl::error::MigrateResult;
use shardctl::migrate::{DataGroupCycler, MigrationSettings, SlotMigrationOrchestrator};
use shardctl::models::{MigrationTask, NodeAddr, ServerGroup, ServerRole, SlotId, SlotStatus};
use shardctl::store::{CoordinationStore, MemoryStore};

/// Node that reports every partition empty
#[derive(Clone)]
struct EmptyNode;

#[async_trait]
impl MigrationConn for EmptyNode {
    async fn migrate_partition(
        &mut self,
        _dest: &NodeAddr,
        _partition: Partition,
        _count: u64,
        _slot: SlotId,
        _timeout_ms: u64,
    ) -> MigrateResult<u64> {
        Ok(0)
    }

    async fn scan(&mut self, _cursor: u64, _count: u64) -> MigrateResult<(u64, Vec<Bytes>)> {
        Ok((0, Vec::new()))
    }

    async fn migrate_key(
        &mut self,
        _dest: &NodeAddr,
        _key: &[u8],
        _slot: SlotId,
        _timeout_ms: u64,
    ) -> MigrateResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Connector for EmptyNode {
    async fn connect(&self, _addr: &str) -> MigrateResult<Box<dyn MigrationConn>> {
        Ok(Box::new(EmptyNode))
    }
}

/// RESP encoding and parsing of the migration verbs
fn bench_resp_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp_codec");

    group.bench_function("encode_migratedb", |b| {
        b.iter(|| {
            black_box(RespEncoder::encode_command(
                "MIGRATEDB",
                &[
                    b"10.0.0.2".as_slice(),
                    b"6380".as_slice(),
                    b"HASH".as_slice(),
                    b"10".as_slice(),
                    b"42".as_slice(),
                    b"30000".as_slice(),
                ],
            ));
        });
    });

    for key_count in [10, 100, 1000].iter() {
        let mut reply = format!("*2\r\n$3\r\n128\r\n*{}\r\n", key_count);
        for i in 0..*key_count {
            let key = format!("key:{}", i);
            reply.push_str(&format!("${}\r\n{}\r\n", key.len(), key));
        }

        group.bench_with_input(
            BenchmarkId::new("parse_scan_reply", key_count),
            &reply,
            |b, reply| {
                b.iter(|| {
                    let mut buf = BytesMut::from(reply.as_str());
                    black_box(RespParser::parse(&mut buf).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Draining one slot through all partitions
fn bench_cycler(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dest: NodeAddr = "10.0.0.2:6380".parse().unwrap();

    c.bench_function("cycler_drain_slot", |b| {
        b.to_async(&rt).iter(|| async {
            let mut conn = EmptyNode;
            let mut cycler = DataGroupCycler::new(10, 30000);
            while cycler.advance(&mut conn, 0, &dest).await.unwrap() {}
            black_box(cycler.current());
        });
    });
}

/// Full task runs against the in-memory store
fn bench_orchestrator(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("orchestrator");

    for slot_count in [16u32, 128].iter() {
        group.bench_with_input(
            BenchmarkId::new("run_task", slot_count),
            slot_count,
            |b, &slot_count| {
                b.to_async(&rt).iter(|| async move {
                    let store = Arc::new(MemoryStore::new("bench"));
                    for id in [1, 2] {
                        let mut group = ServerGroup::new("bench", id);
                        group.add_server(&format!("10.0.0.{}:6380", id), ServerRole::Master);
                        store.update_group(&group).await.unwrap();
                    }
                    store.init_slots(slot_count, false).await.unwrap();
                    store
                        .set_slot_range(0, slot_count - 1, 1, SlotStatus::Online)
                        .await
                        .unwrap();

                    let engine = SlotMigrationOrchestrator::new(
                        store,
                        Arc::new(EmptyNode),
                        MigrationSettings::default(),
                    );
                    let mut task = MigrationTask::new(0, slot_count - 1, 2, 0).unwrap();
                    engine.run(&mut task).await.unwrap();
                    black_box(task.percent);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_resp_codec, bench_cycler, bench_orchestrator);
criterion_main!(benches);
