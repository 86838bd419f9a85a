//! Transition event ingest
//!
//! The hot-path orchestrator, invoked once per context switch per
//! processor. Switch-out records a pending block start for the outgoing
//! thread; switch-in consumes the incoming thread's pending start, runs
//! the interval through the validity filter, builds the resume-site key,
//! and folds the delta into the aggregation table.
//!
//! Contract: never fails its caller. The caller is the scheduler itself;
//! every internal failure degrades to silent, counted data loss. The path
//! never blocks, sleeps, allocates, or takes a lock. Invocations may run
//! concurrently on distinct processors for distinct threads, never
//! concurrently for the same thread.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::agg_table::{AggregationTable, COUNTS_CAPACITY};
use crate::clock::Clock;
use crate::error::DropReason;
use crate::filter::validate_interval;
use crate::key::{CommName, WaitKey};
use crate::stack_capture::StackCapture;
use crate::start_table::{StartTimeTable, START_CAPACITY};

/// One scheduler transition notification.
///
/// Thread-group id and comm describe the *incoming* thread; the original
/// hook read them from the current task at switch-in, here the feed
/// supplies them alongside the ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadTransition {
    /// Thread leaving the processor.
    pub prev_tid: u32,
    /// Thread resuming on the processor.
    pub next_tid: u32,
    /// Thread-group id of the resuming thread.
    pub next_tgid: u32,
    /// Name of the resuming thread.
    pub next_comm: CommName,
}

/// Profiler configuration, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilerConfig {
    /// Only profile this thread id; 0 profiles every thread. A pure cost
    /// optimization on the ingest path, not a correctness requirement.
    pub target_tid: u32,
    /// Capacity of the block-start table.
    pub start_capacity: usize,
    /// Capacity of the aggregation table.
    pub counts_capacity: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            target_tid: 0,
            start_capacity: START_CAPACITY,
            counts_capacity: COUNTS_CAPACITY,
        }
    }
}

/// Hot-path drop and throughput counters, all atomics.
#[derive(Debug, Default)]
pub struct IngestStats {
    intervals_recorded: AtomicU64,
    clock_anomalies: AtomicU64,
    out_of_range: AtomicU64,
    counts_capacity_drops: AtomicU64,
    start_capacity_drops: AtomicU64,
    stack_capture_failures: AtomicU64,
}

impl IngestStats {
    fn count_drop(&self, reason: DropReason) {
        let cell = match reason {
            DropReason::CapacityExceeded => &self.counts_capacity_drops,
            DropReason::ClockAnomaly => &self.clock_anomalies,
            DropReason::OutOfRangeDuration => &self.out_of_range,
        };
        cell.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            intervals_recorded: self.intervals_recorded.load(Ordering::Relaxed),
            clock_anomalies: self.clock_anomalies.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
            counts_capacity_drops: self.counts_capacity_drops.load(Ordering::Relaxed),
            start_capacity_drops: self.start_capacity_drops.load(Ordering::Relaxed),
            stack_capture_failures: self.stack_capture_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    /// Intervals that passed the filter and reached the table.
    pub intervals_recorded: u64,
    /// Intervals dropped because start > end.
    pub clock_anomalies: u64,
    /// Intervals dropped by the min/max duration bounds.
    pub out_of_range: u64,
    /// Deltas discarded because the aggregation table was full.
    pub counts_capacity_drops: u64,
    /// Pending intervals dropped because the start table was full.
    pub start_capacity_drops: u64,
    /// Intervals recorded under a degraded key (sentinel stack id).
    /// Counted, not dropped.
    pub stack_capture_failures: u64,
}

/// The off-CPU profiler core: start table, aggregation table, and the
/// clock/stack-capture capabilities behind one ingest entry point.
pub struct OffCpuProfiler<C: Clock, S: StackCapture> {
    clock: C,
    stacks: S,
    start: StartTimeTable,
    counts: AggregationTable,
    target_tid: u32,
    stats: IngestStats,
}

impl<C: Clock, S: StackCapture> OffCpuProfiler<C, S> {
    /// Build a profiler with fixed table sizing. All table memory is
    /// allocated here, none on the ingest path.
    pub fn new(config: ProfilerConfig, clock: C, stacks: S) -> Self {
        Self {
            clock,
            stacks,
            start: StartTimeTable::with_capacity(config.start_capacity),
            counts: AggregationTable::with_capacity(config.counts_capacity),
            target_tid: config.target_tid,
            stats: IngestStats::default(),
        }
    }

    /// Process one scheduler transition. Infallible by contract: every
    /// internal failure is swallowed into the stats counters.
    pub fn on_context_switch(&self, transition: &ThreadTransition) {
        // Switch-out side: record when the outgoing thread left the
        // processor.
        if self.target_tid == 0 || transition.prev_tid == self.target_tid {
            let ts = self.clock.now_ns();
            if self
                .start
                .record_block_start(transition.prev_tid, ts)
                .is_err()
            {
                self.stats
                    .start_capacity_drops
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        // Switch-in side: close the incoming thread's pending interval.
        if self.target_tid != 0 && transition.next_tid != self.target_tid {
            return;
        }

        let Some(start_ns) = self.start.consume_block_start(transition.next_tid) else {
            // Untracked: filtered out earlier, or the start table was
            // full at switch-out. Nothing mutates.
            return;
        };

        let end_ns = self.clock.now_ns();
        let delta_ns = match validate_interval(start_ns, end_ns) {
            Ok(delta) => delta,
            Err(reason) => {
                self.stats.count_drop(reason);
                return;
            }
        };

        // Attribution happens at resume: capture stacks and comm now.
        let key = WaitKey::at_resume(
            transition.next_tid,
            transition.next_tgid,
            &self.stacks,
            transition.next_comm,
        );
        if key.has_degraded_stacks() {
            self.stats
                .stack_capture_failures
                .fetch_add(1, Ordering::Relaxed);
        }

        match self.counts.add_duration(&key, delta_ns) {
            Ok(()) => {
                self.stats.intervals_recorded.fetch_add(1, Ordering::Relaxed);
            }
            Err(reason) => self.stats.count_drop(reason),
        }
    }

    /// The aggregation sink, for the reporting/drain consumer.
    pub fn counts(&self) -> &AggregationTable {
        &self.counts
    }

    /// The pending-start table, exposed for inspection.
    pub fn pending_starts(&self) -> &StartTimeTable {
        &self.start
    }

    /// Current drop/throughput counters.
    pub fn stats(&self) -> IngestSnapshot {
        self.stats.snapshot()
    }
}
