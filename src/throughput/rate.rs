//! Rate calculation: bytes over elapsed time, in Mbps and the report unit.

use std::time::Duration;

use serde::Serialize;

use crate::config::ReportUnit;

/// Windows shorter than this are too short to yield a meaningful rate.
pub const MIN_MEASURABLE_ELAPSED: Duration = Duration::from_micros(1);

/// Volume and rate derived from one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rate {
    /// Transferred volume expressed in the report unit.
    pub volume: f64,
    /// Megabits per second (10^6 bits).
    pub rate_mbps: f64,
}

/// Convert a byte count to the given report unit.
pub fn volume_in(bytes: u64, unit: ReportUnit) -> f64 {
    bytes as f64 / unit.bytes_per_unit() as f64
}

/// Megabits per second for `bytes` moved in `elapsed`.
///
/// Returns `0.0` when `elapsed` is below [`MIN_MEASURABLE_ELAPSED`].
pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    if elapsed < MIN_MEASURABLE_ELAPSED {
        return 0.0;
    }
    bytes as f64 * 8.0 / 1_000_000.0 / elapsed.as_secs_f64()
}

pub fn calculate(bytes: u64, elapsed: Duration, unit: ReportUnit) -> Rate {
    Rate {
        volume: volume_in(bytes, unit),
        rate_mbps: mbps(bytes, elapsed),
    }
}
