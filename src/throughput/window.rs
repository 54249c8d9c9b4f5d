//! Measurement windows: a start instant plus a running byte count, frozen
//! into a [`FinalizedWindow`] when the window ends.

use std::time::Duration;

use tokio::time::Instant;

/// An open window accumulating transferred bytes.
#[derive(Debug)]
pub struct MeasurementWindow {
    started_at: Instant,
    bytes: u64,
}

impl MeasurementWindow {
    /// Open a window starting now.
    pub fn open() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(started_at: Instant) -> Self {
        Self { started_at, bytes: 0 }
    }

    /// Count `len` more bytes. The count never decreases.
    pub fn record(&mut self, len: usize) {
        self.bytes = self.bytes.saturating_add(len as u64);
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Close the window now.
    pub fn finalize(self) -> FinalizedWindow {
        self.finalize_at(Instant::now())
    }

    pub fn finalize_at(self, ended_at: Instant) -> FinalizedWindow {
        FinalizedWindow {
            started_at: self.started_at,
            ended_at,
            bytes_transferred: self.bytes,
        }
    }
}

/// A closed, immutable window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizedWindow {
    pub started_at: Instant,
    pub ended_at: Instant,
    pub bytes_transferred: u64,
}

impl FinalizedWindow {
    pub fn elapsed(&self) -> Duration {
        self.ended_at.saturating_duration_since(self.started_at)
    }

    /// Offsets of this window in seconds, relative to `origin`.
    pub fn offsets_from(&self, origin: Instant) -> (f64, f64) {
        (
            self.started_at.saturating_duration_since(origin).as_secs_f64(),
            self.ended_at.saturating_duration_since(origin).as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let mut window = MeasurementWindow::open();
        let mut last = window.bytes();
        for len in [1000, 0, 3, 1000] {
            window.record(len);
            assert!(window.bytes() >= last);
            last = window.bytes();
        }
        assert_eq!(window.bytes(), 2003);
    }

    #[test]
    fn test_finalize_fixes_end() {
        let origin = Instant::now();
        let start = origin + Duration::from_secs(2);
        let mut window = MeasurementWindow::starting_at(start);
        window.record(500);
        let done = window.finalize_at(start + Duration::from_millis(1500));

        assert_eq!(done.bytes_transferred, 500);
        assert_eq!(done.elapsed(), Duration::from_millis(1500));
        assert_eq!(done.offsets_from(origin), (2.0, 3.5));
    }

    #[test]
    fn test_end_before_start_clamps_to_zero() {
        let start = Instant::now();
        let window = MeasurementWindow::starting_at(start + Duration::from_secs(1));
        let done = window.finalize_at(start);
        assert_eq!(done.elapsed(), Duration::ZERO);
    }
}
