//! Performance benchmarks for ledger-sync

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ledger_sync::checksum::{checksum, fallback_checksum};
use ledger_sync::{
    ApplicationState, EngineConfig, ManualClock, MemoryDocumentStore, MemoryStore,
    SessionContext, SnapshotType, StateBlob, SyncEngine, SyncOptions, SyncService,
};
use serde_json::json;
use std::sync::Arc;

fn ledger_with(transactions: usize) -> ApplicationState {
    let rows: Vec<_> = (0..transactions)
        .map(|i| {
            json!({
                "id": format!("tx-{}", i),
                "amount": -(i as f64) * 1.25,
                "payee": "Grocer",
                "category": "food",
                "date": "2024-06-01"
            })
        })
        .collect();
    ApplicationState::default()
        .with_transactions(json!(rows))
        .with_accounts(json!([{ "id": "acc-1", "name": "Checking" }]))
}

fn bench_checksums(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");

    for size in [100, 1000, 10000].iter() {
        let json = ledger_with(*size).to_json().unwrap();

        group.bench_with_input(BenchmarkId::new("sha256", size), &json, |b, json| {
            b.iter(|| checksum(black_box(json.as_bytes())))
        });

        group.bench_with_input(BenchmarkId::new("fallback", size), &json, |b, json| {
            b.iter(|| fallback_checksum(black_box(json.as_bytes())))
        });
    }

    group.finish();
}

fn bench_state_blobs(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_blob");

    for size in [100, 1000].iter() {
        let state = ledger_with(*size);
        let blob = StateBlob::seal(&state).unwrap();

        group.bench_with_input(BenchmarkId::new("seal", size), &state, |b, state| {
            b.iter(|| StateBlob::seal(black_box(state)))
        });

        group.bench_with_input(BenchmarkId::new("open", size), &blob, |b, blob| {
            b.iter(|| StateBlob::open(black_box(&blob.json), black_box(&blob.checksum)))
        });
    }

    group.finish();
}

fn bench_restore_points(c: &mut Criterion) {
    let mut group = c.benchmark_group("restore_points");
    let state = ledger_with(200);

    // Retention keeps the collection at its cap, so this measures steady state
    group.bench_function("create_at_retention", |b| {
        let service = SyncService::local_only(
            EngineConfig::default(),
            Arc::new(SessionContext::new("bench").with_user("user-1")),
            Arc::new(MemoryStore::new()),
        );
        b.iter(|| {
            service.create_restore_point("bench", SnapshotType::Scheduled, black_box(&state))
        })
    });

    group.bench_function("list", |b| {
        let service = SyncService::local_only(
            EngineConfig::default(),
            Arc::new(SessionContext::new("bench").with_user("user-1")),
            Arc::new(MemoryStore::new()),
        );
        for i in 0..10 {
            service
                .create_restore_point(format!("point {}", i), SnapshotType::Manual, &state)
                .unwrap();
        }
        b.iter(|| service.list_restore_points(black_box(10)))
    });

    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    for size in [100, 1000].iter() {
        let state = ledger_with(*size);
        group.bench_with_input(BenchmarkId::new("memory_remote", size), &state, |b, state| {
            let engine = SyncEngine::new(
                Arc::new(SessionContext::new("bench").with_user("user-1")),
                Arc::new(MemoryDocumentStore::new()),
                Arc::new(MemoryStore::new()),
                Arc::new(ManualClock::new(chrono::Utc::now())),
            );
            b.iter(|| {
                runtime.block_on(engine.sync(black_box(state), SyncOptions::default()))
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_checksums,
    bench_state_blobs,
    bench_restore_points,
    bench_sync
);
criterion_main!(benches);
