// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Frame clock in whole milliseconds.
///
/// Deltas are derived from the total elapsed time rather than from the gap
/// between two ticks, so the sub-millisecond remainder of a fast frame is
/// carried into the next one instead of being truncated away. Summing every
/// delta returned by [`TimeManager::tick`] always equals [`TimeManager::elapsed_ms`].
#[derive(Debug, Clone)]
pub struct TimeManager {
    start: Instant,
    now: Instant,
    accounted_ms: u64,
}

impl Default for TimeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeManager {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            start,
            now: start,
            accounted_ms: 0,
        }
    }

    /// Advances the clock to the current instant and returns the delta in ms.
    pub fn tick(&mut self) -> u64 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> u64 {
        // Instants can come from different sources in tests; never go backwards.
        if now > self.now {
            self.now = now;
        }
        let total = self.elapsed_ms();
        let delta = total - self.accounted_ms;
        self.accounted_ms = total;
        delta
    }

    /// Milliseconds between construction and the most recent tick.
    pub fn elapsed_ms(&self) -> u64 {
        duration_ms(self.now.duration_since(self.start))
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.now.duration_since(self.start).as_secs_f32()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_millisecond_frames_are_not_lost() {
        let t0 = Instant::now();
        let mut time = TimeManager::starting_at(t0);

        let mut sum = 0;
        for i in 1..=10 {
            sum += time.tick_at(t0 + Duration::from_micros(400 * i));
        }
        // 10 frames of 0.4 ms each: 4 ms total, even though most single deltas are 0.
        assert_eq!(sum, 4);
        assert_eq!(time.elapsed_ms(), 4);
    }

    #[test]
    fn delta_matches_wall_time_for_slow_frames() {
        let t0 = Instant::now();
        let mut time = TimeManager::starting_at(t0);
        assert_eq!(time.tick_at(t0 + Duration::from_millis(16)), 16);
        assert_eq!(time.tick_at(t0 + Duration::from_millis(33)), 17);
        assert!((time.elapsed_secs() - 0.033).abs() < 1e-4);
    }

    #[test]
    fn clock_never_runs_backwards() {
        let t0 = Instant::now();
        let mut time = TimeManager::starting_at(t0);
        time.tick_at(t0 + Duration::from_millis(10));
        assert_eq!(time.tick_at(t0 + Duration::from_millis(5)), 0);
        assert_eq!(time.elapsed_ms(), 10);
    }
}
