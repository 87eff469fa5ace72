//! Simulation time.
//!
//! Time advances in discrete ticks; `ticks_per_day` ticks make a day. The
//! clock also knows the episode horizon so deadline capping and run
//! termination share one source of truth.

use serde::{Deserialize, Serialize};

/// Discrete tick/day clock for one simulation episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    current_tick: u64,
    ticks_per_day: u64,
    num_days: u64,
}

impl SimClock {
    /// Create a clock for `num_days` days of `ticks_per_day` ticks each.
    ///
    /// # Panics
    /// Panics if either dimension is zero; the config layer validates this
    /// before construction.
    pub fn new(ticks_per_day: u64, num_days: u64) -> Self {
        assert!(ticks_per_day > 0, "ticks_per_day must be positive");
        assert!(num_days > 0, "num_days must be positive");
        Self {
            current_tick: 0,
            ticks_per_day,
            num_days,
        }
    }

    pub fn advance(&mut self) {
        self.current_tick += 1;
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Current day, 0-indexed.
    pub fn current_day(&self) -> u64 {
        self.current_tick / self.ticks_per_day
    }

    /// Tick within the current day, 0-indexed.
    pub fn tick_in_day(&self) -> u64 {
        self.current_tick % self.ticks_per_day
    }

    /// True on the last tick of a day; end-of-day processing runs then.
    pub fn is_last_tick_of_day(&self) -> bool {
        self.tick_in_day() == self.ticks_per_day - 1
    }

    /// True on the first tick of a day; strategic collateral runs then.
    pub fn is_first_tick_of_day(&self) -> bool {
        self.tick_in_day() == 0
    }

    pub fn ticks_per_day(&self) -> u64 {
        self.ticks_per_day
    }

    /// Final tick index of the episode (exclusive horizon minus one).
    pub fn episode_end_tick(&self) -> u64 {
        self.ticks_per_day * self.num_days - 1
    }

    /// True once the episode horizon has been reached.
    pub fn is_finished(&self) -> bool {
        self.current_tick >= self.ticks_per_day * self.num_days
    }

    /// Fraction of the current day elapsed, in [0, 1).
    pub fn day_progress(&self) -> f64 {
        self.tick_in_day() as f64 / self.ticks_per_day as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_rollover() {
        let mut clock = SimClock::new(10, 2);
        assert_eq!(clock.current_day(), 0);
        assert!(clock.is_first_tick_of_day());

        for _ in 0..9 {
            clock.advance();
        }
        assert!(clock.is_last_tick_of_day());
        assert_eq!(clock.current_day(), 0);

        clock.advance();
        assert_eq!(clock.current_day(), 1);
        assert!(clock.is_first_tick_of_day());
    }

    #[test]
    fn test_episode_horizon() {
        let mut clock = SimClock::new(5, 2);
        assert_eq!(clock.episode_end_tick(), 9);
        assert!(!clock.is_finished());
        for _ in 0..10 {
            clock.advance();
        }
        assert!(clock.is_finished());
    }

    #[test]
    #[should_panic(expected = "ticks_per_day must be positive")]
    fn test_zero_ticks_per_day_panics() {
        SimClock::new(0, 1);
    }
}
