//! Context-switch ingest overhead benchmark
//!
//! The ingest path runs once per context switch per processor, so its
//! latency is the profiler's entire overhead budget. This measures the
//! full switch-out/switch-in round trip as well as the two table
//! primitives in isolation.
//!
//! ```bash
//! cargo bench --bench ingest_overhead
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use offcpu::agg_table::AggregationTable;
use offcpu::clock::ManualClock;
use offcpu::ingest::{OffCpuProfiler, ProfilerConfig, ThreadTransition};
use offcpu::key::{CommName, WaitKey};
use offcpu::stack_capture::ScriptedStacks;
use offcpu::start_table::StartTimeTable;

/// Benchmark: matched switch-out/switch-in pair through the full path.
fn bench_transition_pair(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0));
    let stacks = Arc::new(ScriptedStacks::new());
    stacks.set(17, 91);
    let profiler = OffCpuProfiler::new(
        ProfilerConfig::default(),
        Arc::clone(&clock),
        stacks,
    );

    let out = ThreadTransition {
        prev_tid: 5,
        next_tid: 2,
        next_tgid: 2,
        next_comm: CommName::new("idle"),
    };
    let back = ThreadTransition {
        prev_tid: 2,
        next_tid: 5,
        next_tgid: 5,
        next_comm: CommName::new("bench"),
    };

    let mut now = 0u64;
    c.bench_function("transition_pair", |b| {
        b.iter(|| {
            now += 1000;
            clock.set(now);
            profiler.on_context_switch(black_box(&out));
            now += 500_000;
            clock.set(now);
            profiler.on_context_switch(black_box(&back));
        })
    });
}

/// Benchmark: the start table's record/consume primitives alone.
fn bench_start_table(c: &mut Criterion) {
    let table = StartTimeTable::with_capacity(10_240);

    c.bench_function("start_record_consume", |b| {
        b.iter(|| {
            table.record_block_start(black_box(5), black_box(1000)).unwrap();
            black_box(table.consume_block_start(black_box(5)));
        })
    });
}

/// Benchmark: atomic add on a resident aggregation key (the steady-state
/// hot case once a key exists).
fn bench_add_resident_key(c: &mut Criterion) {
    let table = AggregationTable::with_capacity(10_240);
    let key = WaitKey {
        tid: 5,
        tgid: 5,
        user_stack_id: 17,
        kernel_stack_id: 91,
        comm: CommName::new("bench"),
    };
    table.add_duration(&key, 1000).unwrap();

    c.bench_function("add_duration_resident", |b| {
        b.iter(|| {
            table.add_duration(black_box(&key), black_box(500_000)).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_transition_pair,
    bench_start_table,
    bench_add_resident_key
);
criterion_main!(benches);
