#![warn(clippy::nursery)]
#![forbid(unsafe_code)]
#![allow(clippy::expect_used, clippy::cast_possible_truncation)]

//! Benchmark the coordinator on contended schedules.
//!
//! Measures how replay cost grows with the number of transactions fighting
//! over a small set of items, where most requests end in a wait or a wound.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use woundwait_core::{Coordinator, Operation, Replayer, TxnId};

// ============================================================================
// FIXTURES
// ============================================================================

const ITEMS: [&str; 4] = ["a", "b", "c", "d"];

/// Round-robin interleaving of `txns` transactions, each reading one item and
/// writing the next
fn contended_schedule(txns: u32) -> Vec<Operation> {
    let ids: Vec<TxnId> = (1..=txns).map(TxnId::new).collect();
    let mut ops: Vec<Operation> = ids.iter().map(|&txn| Operation::Begin { txn }).collect();
    for (i, &txn) in ids.iter().enumerate() {
        ops.push(Operation::Read {
            txn,
            item: ITEMS[i % ITEMS.len()].to_string(),
        });
    }
    for (i, &txn) in ids.iter().enumerate().rev() {
        ops.push(Operation::Write {
            txn,
            item: ITEMS[(i + 1) % ITEMS.len()].to_string(),
        });
    }
    ops.extend(ids.iter().map(|&txn| Operation::Commit { txn }));
    ops
}

// ============================================================================
// BENCHMARKS
// ============================================================================

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_contended");
    for txns in [4u32, 16, 64] {
        let schedule = contended_schedule(txns);
        group.throughput(Throughput::Elements(schedule.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(txns), &schedule, |b, schedule| {
            b.iter(|| {
                let mut replayer = Replayer::new();
                replayer.run(black_box(schedule.iter().cloned()));
                replayer.finish()
            });
        });
    }
    group.finish();
}

fn bench_shared_readers(c: &mut Criterion) {
    c.bench_function("shared_readers_then_commit", |b| {
        b.iter(|| {
            let mut coordinator = Coordinator::new();
            for id in 1..=32 {
                let txn = TxnId::new(id);
                coordinator.begin(txn).expect("begin");
                coordinator.read(txn, black_box("x")).expect("read");
            }
            for id in 1..=32 {
                coordinator.commit(TxnId::new(id)).expect("commit");
            }
            coordinator.drain_notifications().len()
        });
    });
}

criterion_group!(benches, bench_replay, bench_shared_readers);
criterion_main!(benches);
