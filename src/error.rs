//! Failure taxonomy for the aggregation hot path
//!
//! Every failure in the profiler core is silent and non-propagating: the
//! caller is the scheduler transition path and must never be slowed,
//! blocked, or aborted by profiling. `DropReason` names why an interval's
//! effect was discarded so the ingest layer can count it.

use thiserror::Error;

/// Why an interval (or its accumulation) was dropped.
///
/// Note that a failed stack capture is *not* a drop: the sentinel stack id
/// is kept as a key component and the interval is recorded under the
/// degraded key (best-effort attribution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropReason {
    /// Insert into a full table; the event's effect is discarded.
    #[error("table at capacity, new key rejected")]
    CapacityExceeded,

    /// Block-start timestamp after block-end timestamp.
    #[error("clock anomaly: start timestamp after end timestamp")]
    ClockAnomaly,

    /// Interval outside [MIN_BLOCK_US, MAX_BLOCK_US]; noise filtering,
    /// not a fault.
    #[error("blocked interval outside plausible range")]
    OutOfRangeDuration,
}
