//! Performance benchmarks for tempo-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempo_engine::{merge, DayStat, SessionMode, SessionRecord, UserSnapshot};

fn snapshot_with(n_sessions: u64, n_days: u32) -> UserSnapshot {
    let mut snapshot = UserSnapshot::default();

    for i in 0..n_sessions {
        let day = (i % 28) + 1;
        snapshot.sessions.push(SessionRecord::new(
            format!("2024-06-{day:02}"),
            25,
            if i % 3 == 0 {
                SessionMode::Reverse
            } else {
                SessionMode::Classic
            },
            1_000_000 + i * 120_000,
        ));
    }

    for d in 1..=n_days {
        snapshot.streaks.productivity_stats_by_day.insert(
            format!("2024-06-{d:02}"),
            DayStat {
                classic: 2,
                reverse: 1,
                total_minutes: 75,
                last_update: Some(1_000_000 + d as u64),
                ..Default::default()
            },
        );
    }

    snapshot
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [10u64, 100, 1000] {
        let local = snapshot_with(size, 28);
        let mut remote = snapshot_with(size, 28);
        // Shift half the remote sessions out of dedup range so the merge
        // does real union work.
        for session in remote.sessions.iter_mut().step_by(2) {
            session.timestamp += 600_000;
        }

        group.bench_with_input(
            BenchmarkId::new("disjoint_half", size),
            &(local, remote),
            |b, (local, remote)| b.iter(|| merge(black_box(local), black_box(remote))),
        );
    }

    // Worst case for the dedup scan: identical snapshots.
    let snapshot = snapshot_with(1000, 28);
    group.bench_function("identical_1000", |b| {
        b.iter(|| merge(black_box(&snapshot), black_box(&snapshot)))
    });

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_json");

    let snapshot = snapshot_with(500, 28);
    let json = snapshot.to_json().unwrap();

    group.bench_function("to_json_500", |b| {
        b.iter(|| black_box(&snapshot).to_json().unwrap())
    });
    group.bench_function("from_json_500", |b| {
        b.iter(|| UserSnapshot::from_json(black_box(&json)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_merge, bench_serialization);
criterion_main!(benches);
