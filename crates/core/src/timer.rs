//! High-resolution timer for frame pacing statistics.

use std::time::{Duration, Instant};

/// High-resolution timer measuring frame-to-frame CPU time.
///
/// Every [`lap`](Self::lap) closes one frame interval and folds it into a
/// running total, so the average frame time is available without keeping
/// a history.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_lap: Instant,
    laps: u64,
    lap_total: Duration,
    longest_lap: Duration,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_lap: now,
            laps: 0,
            lap_total: Duration::ZERO,
            longest_lap: Duration::ZERO,
        }
    }

    /// Total elapsed time since the timer was created or reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Close the current interval and return its length.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_lap;
        self.last_lap = now;
        self.laps += 1;
        self.lap_total += delta;
        self.longest_lap = self.longest_lap.max(delta);
        delta
    }

    /// Number of completed laps.
    pub fn laps(&self) -> u64 {
        self.laps
    }

    /// Mean lap length, or zero before the first lap.
    pub fn average_lap(&self) -> Duration {
        if self.laps == 0 {
            return Duration::ZERO;
        }
        // Saturate rather than truncate the divisor on absurd lap counts.
        self.lap_total / u32::try_from(self.laps).unwrap_or(u32::MAX)
    }

    /// Longest lap observed so far.
    pub fn longest_lap(&self) -> Duration {
        self.longest_lap
    }

    /// Reset the timer to the current time and forget all laps.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_lap_is_zero_without_laps() {
        let timer = Timer::new();
        assert_eq!(timer.laps(), 0);
        assert_eq!(timer.average_lap(), Duration::ZERO);
    }

    #[test]
    fn test_laps_accumulate() {
        let mut timer = Timer::new();
        let first = timer.lap();
        let second = timer.lap();
        assert_eq!(timer.laps(), 2);
        assert!(timer.longest_lap() >= first.max(second));
        assert!(timer.elapsed() >= first + second);
    }

    #[test]
    fn test_reset_forgets_laps() {
        let mut timer = Timer::new();
        timer.lap();
        timer.reset();
        assert_eq!(timer.laps(), 0);
        assert_eq!(timer.longest_lap(), Duration::ZERO);
    }
}
