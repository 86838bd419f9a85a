//! Interval validity filter
//!
//! Rejects implausible or uninteresting block intervals before they reach
//! the aggregation table. The bounds are in microseconds: sub-microsecond
//! wakeups are scheduler noise, and anything above ~100 seconds is a stale
//! start or a clock problem rather than a real wait worth attributing.
//!
//! The filter applies to the detailed, stack-keyed profiler only; see
//! DESIGN.md for the variant decision.

use crate::error::DropReason;

/// Minimum plausible blocked interval, microseconds (inclusive).
pub const MIN_BLOCK_US: u64 = 1;

/// Maximum plausible blocked interval, microseconds (inclusive).
pub const MAX_BLOCK_US: u64 = 99_999_999;

/// Validate a completed block interval.
///
/// Returns the interval length in nanoseconds when it passes; the
/// microsecond bounds are only the filter's unit, accumulation stays in
/// nanoseconds.
pub fn validate_interval(start_ns: u64, end_ns: u64) -> Result<u64, DropReason> {
    if start_ns > end_ns {
        return Err(DropReason::ClockAnomaly);
    }

    let delta_ns = end_ns - start_ns;
    let delta_us = delta_ns / 1000;
    if !(MIN_BLOCK_US..=MAX_BLOCK_US).contains(&delta_us) {
        return Err(DropReason::OutOfRangeDuration);
    }

    Ok(delta_ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_anomaly_dropped() {
        assert_eq!(validate_interval(2000, 1000), Err(DropReason::ClockAnomaly));
    }

    #[test]
    fn test_sub_microsecond_dropped() {
        // delta_us == 0
        assert_eq!(
            validate_interval(1000, 1999),
            Err(DropReason::OutOfRangeDuration)
        );
    }

    #[test]
    fn test_one_microsecond_retained() {
        // delta_us == 1, lower boundary inclusive
        assert_eq!(validate_interval(1000, 2000), Ok(1000));
    }

    #[test]
    fn test_upper_boundary_retained() {
        let delta_ns = MAX_BLOCK_US * 1000;
        assert_eq!(validate_interval(0, delta_ns), Ok(delta_ns));
    }

    #[test]
    fn test_above_upper_boundary_dropped() {
        let delta_ns = (MAX_BLOCK_US + 1) * 1000;
        assert_eq!(
            validate_interval(0, delta_ns),
            Err(DropReason::OutOfRangeDuration)
        );
    }

    #[test]
    fn test_zero_length_interval_dropped() {
        assert_eq!(
            validate_interval(500, 500),
            Err(DropReason::OutOfRangeDuration)
        );
    }

    #[test]
    fn test_passing_interval_keeps_nanosecond_precision() {
        // 500 us and change: the full ns delta comes back, not a rounded us
        assert_eq!(validate_interval(1000, 501_432), Ok(500_432));
    }
}
