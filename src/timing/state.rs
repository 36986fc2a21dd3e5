use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BPM: f64 = 120.0;

/// A snapshot of a scheduler's position and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub current_tick: u64,
    pub is_playing: bool,
    pub tempo_bpm: f64,
    pub ticks_per_quarter: u16,
}

/// Finite and above zero.
pub fn valid_bpm(bpm: f64) -> bool {
    bpm.is_finite() && bpm > 0.0
}

/// Mutable clock fields shared between the caller and the timing thread.
#[derive(Debug, Clone)]
pub(crate) struct Clock {
    pub current_tick: u64,
    pub bpm: f64,
    pub ticks_per_quarter: u16,
    /// Largest `start + duration` of the loaded notes.
    pub max_tick: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            current_tick: 0,
            bpm: DEFAULT_BPM,
            ticks_per_quarter: 480,
            max_tick: 0,
        }
    }

    /// Wall-clock length of one tick, i.e. `60000 / (bpm * tpq)` ms.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / (self.bpm * self.ticks_per_quarter as f64))
    }

    pub fn on_beat(&self) -> bool {
        self.current_tick % self.ticks_per_quarter as u64 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_interval_follows_tempo_and_resolution() {
        let mut clock = Clock::new();
        clock.bpm = 120.0;
        clock.ticks_per_quarter = 480;
        // 500ms per beat over 480 ticks.
        assert_eq!(clock.tick_interval().as_micros(), 1041);

        clock.bpm = 60.0;
        clock.ticks_per_quarter = 1;
        assert_eq!(clock.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn beats_fall_on_multiples_of_resolution() {
        let mut clock = Clock::new();
        clock.ticks_per_quarter = 4;
        clock.current_tick = 8;
        assert!(clock.on_beat());
        clock.current_tick = 9;
        assert!(!clock.on_beat());
    }

    #[test]
    fn tempo_must_be_positive_and_finite() {
        assert!(valid_bpm(120.0));
        assert!(!valid_bpm(0.0));
        assert!(!valid_bpm(-5.0));
        assert!(!valid_bpm(f64::NAN));
        assert!(!valid_bpm(f64::INFINITY));
    }
}
