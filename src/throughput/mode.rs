//! Transmission modes and their selection.

use std::time::Duration;

use crate::config::{ConfigError, ReportUnit};

/// How a transmitter decides when to stop sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Send until the configured duration has elapsed.
    Duration,
    /// Send until at least `bytes` have been written.
    FixedVolume { bytes: u64 },
    /// Send for the configured duration in windows of `every`, reporting each.
    Interval { every: Duration },
}

/// Pick the mode from the raw options.
///
/// A fixed volume wins over an interval, which wins over plain duration. An
/// interval of `0` seconds means "not set".
pub fn select_mode(volume: Option<&str>, interval_secs: u64) -> Result<Mode, ConfigError> {
    if let Some(spec) = volume {
        let bytes = parse_volume(spec)?;
        return Ok(Mode::FixedVolume { bytes });
    }

    if interval_secs > 0 {
        return Ok(Mode::Interval {
            every: Duration::from_secs(interval_secs),
        });
    }

    Ok(Mode::Duration)
}

/// Parse `<number><unit>` (e.g. `5000B`, `1kb`, `10MB`) into a byte count.
pub fn parse_volume(spec: &str) -> Result<u64, ConfigError> {
    let malformed = || ConfigError::MalformedVolume(spec.to_string());

    let trimmed = spec.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(malformed)?;
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(malformed());
    }

    let count: u64 = digits.parse().map_err(|_| malformed())?;
    let unit: ReportUnit = unit.parse().map_err(|_| malformed())?;

    count.checked_mul(unit.bytes_per_unit()).ok_or_else(malformed)
}

/// Number of whole intervals that fit in `total`.
pub fn interval_count(total: Duration, every: Duration) -> u64 {
    if every.is_zero() {
        return 0;
    }
    (total.as_nanos() / every.as_nanos()) as u64
}
