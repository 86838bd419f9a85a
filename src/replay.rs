//! Transition trace replay
//!
//! Drives the profiler core from a recorded transition trace (JSON lines,
//! one transition per line) instead of a live scheduler feed. This is the
//! offline stand-in for the capture/transport layer: it primes the manual
//! clock and the scripted stack capture from each record, then feeds the
//! transition through the normal ingest path.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::clock::ManualClock;
use crate::ingest::{IngestSnapshot, OffCpuProfiler, ProfilerConfig, ThreadTransition};
use crate::key::CommName;
use crate::stack_capture::{ScriptedStacks, STACK_ID_FAILED};

fn default_stack_id() -> i64 {
    STACK_ID_FAILED
}

/// One recorded scheduler transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Monotonic timestamp of the transition, nanoseconds.
    pub ts: u64,
    /// Thread leaving the processor.
    pub prev_tid: u32,
    /// Thread resuming on the processor.
    pub next_tid: u32,
    /// Thread-group id of the resuming thread.
    pub next_tgid: u32,
    /// Name of the resuming thread.
    pub next_comm: String,
    /// User stack signature at resume; absent means capture failed.
    #[serde(default = "default_stack_id")]
    pub user_stack: i64,
    /// Kernel stack signature at resume; absent means capture failed.
    #[serde(default = "default_stack_id")]
    pub kernel_stack: i64,
}

/// Profiler plus the manual capabilities the trace records drive.
pub struct ReplayDriver {
    profiler: OffCpuProfiler<Arc<ManualClock>, Arc<ScriptedStacks>>,
    clock: Arc<ManualClock>,
    stacks: Arc<ScriptedStacks>,
}

impl ReplayDriver {
    /// Build a driver around a freshly-configured profiler.
    pub fn new(config: ProfilerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let stacks = Arc::new(ScriptedStacks::new());
        let profiler = OffCpuProfiler::new(config, Arc::clone(&clock), Arc::clone(&stacks));
        Self {
            profiler,
            clock,
            stacks,
        }
    }

    /// Feed one recorded transition through the ingest path.
    pub fn feed(&self, record: &TraceRecord) {
        self.clock.set(record.ts);
        self.stacks.set(record.user_stack, record.kernel_stack);
        self.profiler.on_context_switch(&ThreadTransition {
            prev_tid: record.prev_tid,
            next_tid: record.next_tid,
            next_tgid: record.next_tgid,
            next_comm: CommName::new(&record.next_comm),
        });
    }

    /// Replay a JSON-lines trace file. Malformed lines are logged and
    /// skipped; returns the number of transitions fed.
    pub fn replay_file(&self, path: &Path) -> Result<usize> {
        let file = File::open(path)
            .with_context(|| format!("failed to open trace file {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut fed = 0usize;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read line {}", lineno + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TraceRecord>(&line) {
                Ok(record) => {
                    self.feed(&record);
                    fed += 1;
                }
                Err(err) => {
                    tracing::warn!(line = lineno + 1, %err, "skipping malformed trace record");
                }
            }
        }

        tracing::debug!(transitions = fed, "trace replay complete");
        Ok(fed)
    }

    /// The profiler under replay.
    pub fn profiler(&self) -> &OffCpuProfiler<Arc<ManualClock>, Arc<ScriptedStacks>> {
        &self.profiler
    }

    /// Ingest counters accumulated so far.
    pub fn stats(&self) -> IngestSnapshot {
        self.profiler.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(ts: u64, prev: u32, next: u32) -> TraceRecord {
        TraceRecord {
            ts,
            prev_tid: prev,
            next_tid: next,
            next_tgid: next,
            next_comm: "app".to_string(),
            user_stack: 1,
            kernel_stack: 2,
        }
    }

    #[test]
    fn test_feed_matched_pair() {
        let driver = ReplayDriver::new(ProfilerConfig::default());
        driver.feed(&record(1000, 5, 9));
        driver.feed(&record(501_000, 9, 5));

        let snap = driver.profiler().counts().snapshot();
        let entry = snap.iter().find(|e| e.key.tid == 5).unwrap();
        assert_eq!(entry.total_ns, 500_000);
    }

    #[test]
    fn test_missing_stack_fields_default_to_sentinel() {
        let json = r#"{"ts":1000,"prev_tid":5,"next_tid":9,"next_tgid":9,"next_comm":"app"}"#;
        let record: TraceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.user_stack, STACK_ID_FAILED);
        assert_eq!(record.kernel_stack, STACK_ID_FAILED);
    }

    #[test]
    fn test_replay_file_skips_malformed_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"ts":1000,"prev_tid":5,"next_tid":9,"next_tgid":9,"next_comm":"app","user_stack":1,"kernel_stack":2}}"#
        )
        .unwrap();
        writeln!(file, "this is not json").unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"ts":501000,"prev_tid":9,"next_tid":5,"next_tgid":5,"next_comm":"app","user_stack":1,"kernel_stack":2}}"#
        )
        .unwrap();

        let driver = ReplayDriver::new(ProfilerConfig::default());
        let fed = driver.replay_file(file.path()).unwrap();
        assert_eq!(fed, 2);
        assert_eq!(driver.stats().intervals_recorded, 1);
    }

    #[test]
    fn test_replay_missing_file_errors() {
        let driver = ReplayDriver::new(ProfilerConfig::default());
        let err = driver
            .replay_file(Path::new("/nonexistent/trace.jsonl"))
            .unwrap_err();
        assert!(err.to_string().contains("failed to open trace file"));
    }
}
