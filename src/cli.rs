//! CLI argument parsing for the offcpu replay front end

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::agg_table::COUNTS_CAPACITY;
use crate::ingest::ProfilerConfig;
use crate::start_table::START_CAPACITY;

/// Output format for the drained report
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV format for spreadsheet analysis
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "offcpu")]
#[command(version)]
#[command(about = "Off-CPU time profiler: replay a transition trace and report blocked time", long_about = None)]
pub struct Cli {
    /// Transition trace to replay (JSON lines, one transition per line)
    #[arg(short = 't', long = "trace", value_name = "FILE")]
    pub trace: PathBuf,

    /// Only profile this thread id (0 = all threads)
    #[arg(long = "target-tid", value_name = "TID", default_value = "0")]
    pub target_tid: u32,

    /// Output format for the report
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Capacity of the aggregation table (fixed, never resized)
    #[arg(long = "counts-capacity", value_name = "N", default_value_t = COUNTS_CAPACITY)]
    pub counts_capacity: usize,

    /// Capacity of the block-start table (fixed, never resized)
    #[arg(long = "start-capacity", value_name = "N", default_value_t = START_CAPACITY)]
    pub start_capacity: usize,

    /// Print ingest drop statistics after the report
    #[arg(long = "stats")]
    pub stats: bool,
}

impl Cli {
    /// Map the parsed flags onto a profiler configuration.
    pub fn profiler_config(&self) -> ProfilerConfig {
        ProfilerConfig {
            target_tid: self.target_tid,
            start_capacity: self.start_capacity,
            counts_capacity: self.counts_capacity,
        }
    }
}
