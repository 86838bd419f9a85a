//! Reporting consumer for the aggregation table
//!
//! The out-of-core drain path: iterate the table, format each entry, and
//! delete it in the same pass ("read resets"), so each report covers the
//! time since the previous one. Not hot-path code; allocation and logging
//! are fine here.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::agg_table::{AggregationTable, WaitEntry};
use crate::ingest::IngestSnapshot;

/// A drained, sorted off-CPU report.
#[derive(Debug, Clone, Default)]
pub struct WaitReport {
    entries: Vec<WaitEntry>,
}

/// One report row in JSON form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWaitEntry {
    pub tid: u32,
    pub tgid: u32,
    pub comm: String,
    pub user_stack_id: i64,
    pub kernel_stack_id: i64,
    /// Cumulative blocked time, nanoseconds.
    pub total_ns: u64,
    /// Cumulative blocked time, microseconds (truncated).
    pub total_us: u64,
}

/// Whole report in JSON form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWaitReport {
    pub entries: Vec<JsonWaitEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub stats: Option<JsonIngestStats>,
}

/// Ingest counters in JSON form (mirrors [`IngestSnapshot`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonIngestStats {
    pub intervals_recorded: u64,
    pub clock_anomalies: u64,
    pub out_of_range: u64,
    pub counts_capacity_drops: u64,
    pub start_capacity_drops: u64,
    pub stack_capture_failures: u64,
}

impl From<IngestSnapshot> for JsonIngestStats {
    fn from(s: IngestSnapshot) -> Self {
        Self {
            intervals_recorded: s.intervals_recorded,
            clock_anomalies: s.clock_anomalies,
            out_of_range: s.out_of_range,
            counts_capacity_drops: s.counts_capacity_drops,
            start_capacity_drops: s.start_capacity_drops,
            stack_capture_failures: s.stack_capture_failures,
        }
    }
}

impl WaitReport {
    /// Drain the table into a report sorted by cumulative blocked time,
    /// descending. The table is empty afterwards.
    pub fn drain_from(table: &AggregationTable) -> Self {
        let mut entries = table.drain();
        entries.sort_by(|a, b| b.total_ns.cmp(&a.total_ns));
        tracing::debug!(entries = entries.len(), "drained aggregation table");
        Self { entries }
    }

    /// Non-destructive variant, for inspection without resetting.
    pub fn snapshot_from(table: &AggregationTable) -> Self {
        let mut entries = table.snapshot();
        entries.sort_by(|a, b| b.total_ns.cmp(&a.total_ns));
        Self { entries }
    }

    /// The sorted entries.
    pub fn entries(&self) -> &[WaitEntry] {
        &self.entries
    }

    /// Total blocked time across all entries, nanoseconds.
    pub fn total_blocked_ns(&self) -> u64 {
        self.entries.iter().map(|e| e.total_ns).sum()
    }

    /// Print a human-readable summary table to stderr.
    pub fn print_summary(&self) {
        if self.entries.is_empty() {
            eprintln!("\nNo off-CPU time recorded.");
            return;
        }

        eprintln!("\n╔════════════════════════════════════════════════════════════════════════════════╗");
        eprintln!("║  Off-CPU Time Summary (sorted by blocked time)                                ║");
        eprintln!("╚════════════════════════════════════════════════════════════════════════════════╝");
        eprintln!();
        eprintln!(
            "{:<16} {:>8} {:>8} {:>12} {:>12} {:>14}",
            "Comm", "TID", "TGID", "UStack", "KStack", "Blocked"
        );
        eprintln!("{}", "─".repeat(88));

        for entry in &self.entries {
            let blocked_s = entry.total_ns as f64 / 1_000_000_000.0;
            eprintln!(
                "{:<16} {:>8} {:>8} {:>12} {:>12} {:>13.6}s",
                entry.key.comm,
                entry.key.tid,
                entry.key.tgid,
                entry.key.user_stack_id,
                entry.key.kernel_stack_id,
                blocked_s
            );
        }

        eprintln!("{}", "─".repeat(88));
        eprintln!(
            "total: {:.6}s across {} keys",
            self.total_blocked_ns() as f64 / 1_000_000_000.0,
            self.entries.len()
        );
    }

    /// Serialize the report to a JSON string.
    pub fn to_json(&self, stats: Option<IngestSnapshot>) -> serde_json::Result<String> {
        let report = JsonWaitReport {
            entries: self
                .entries
                .iter()
                .map(|e| JsonWaitEntry {
                    tid: e.key.tid,
                    tgid: e.key.tgid,
                    comm: e.key.comm.as_display(),
                    user_stack_id: e.key.user_stack_id,
                    kernel_stack_id: e.key.kernel_stack_id,
                    total_ns: e.total_ns,
                    total_us: e.total_ns / 1000,
                })
                .collect(),
            stats: stats.map(JsonIngestStats::from),
        };
        serde_json::to_string_pretty(&report)
    }

    /// Write CSV rows (with header) for spreadsheet import.
    pub fn write_csv(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writeln!(writer, "comm,tid,tgid,user_stack_id,kernel_stack_id,total_ns")?;
        for entry in &self.entries {
            writeln!(
                writer,
                "{},{},{},{},{},{}",
                entry.key.comm,
                entry.key.tid,
                entry.key.tgid,
                entry.key.user_stack_id,
                entry.key.kernel_stack_id,
                entry.total_ns
            )?;
        }
        Ok(())
    }
}
