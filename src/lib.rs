//! Offcpu - off-CPU time profiler
//!
//! This library aggregates the time threads spend blocked off-processor
//! (waiting on locks, I/O, or scheduling) into cumulative counters keyed
//! by thread identity plus resume-site call-stack signature. The core is
//! built for a scheduler hot path: one call per context switch per
//! processor, reentrant across processors, with no blocking, no heap
//! allocation, and no locks.

pub mod agg_table;
pub mod cli;
pub mod clock;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod key;
pub mod replay;
pub mod report;
pub mod stack_capture;
pub mod start_table;
