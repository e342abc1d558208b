use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// s of wall time per frame
    pub nominal_tick: f64,
    pub speed: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    /// Wall deltas beyond this many nominal ticks are clamped
    pub max_tick_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            nominal_tick: 0.1,
            speed: 1.0,
            min_speed: 0.1,
            max_speed: 50.0,
            max_tick_factor: 5.0,
        }
    }
}

impl SchedulerConfig {
    /// Largest simulated step a single frame can hand out, s.
    pub fn max_frame(&self) -> f64 {
        self.nominal_tick * self.max_tick_factor * self.max_speed
    }
}

/// Turns wall-clock frames into simulated `dt`.
///
/// Pausing, resuming and changing speed re-baseline the wall clock, and the
/// frame that follows is dropped so a stale delta is never integrated.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    speed: f64,
    paused: bool,
    last: Option<Instant>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let speed = config.speed.clamp(config.min_speed, config.max_speed);
        Self {
            config,
            speed,
            paused: false,
            last: None,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_speed(&mut self, multiplier: f64) {
        if !multiplier.is_finite() {
            return;
        }
        self.speed = multiplier.clamp(self.config.min_speed, self.config.max_speed);
        self.last = None;
        tracing::info!("simulation speed set to {:.1}x", self.speed);
    }

    pub fn pause(&mut self) {
        self.paused = true;
        self.last = None;
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.last = None;
    }

    /// Simulated seconds to advance for a frame at `now`, or `None` when the
    /// frame is skipped.
    pub fn frame(&mut self, now: Instant) -> Option<f64> {
        if self.paused {
            return None;
        }
        let last = self.last.replace(now)?;
        let wall = now.saturating_duration_since(last).as_secs_f64();
        let cap = self.config.nominal_tick * self.config.max_tick_factor;
        if wall > cap {
            tracing::warn!("frame delta {:.3}s clamped to {:.3}s", wall, cap);
        }
        Some(wall.min(cap) * self.speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    #[test]
    fn scales_wall_time_by_speed() {
        let mut s = Scheduler::new(SchedulerConfig::default());
        s.set_speed(10.0);
        let t0 = Instant::now();
        assert_eq!(s.frame(t0), None);
        let dt = s.frame(t0 + Duration::from_millis(100));
        assert_relative_eq!(dt.unwrap_or_default(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn long_gap_is_clamped() {
        let mut s = Scheduler::new(SchedulerConfig::default());
        let t0 = Instant::now();
        s.frame(t0);
        let dt = s.frame(t0 + Duration::from_secs(300));
        assert_relative_eq!(dt.unwrap_or_default(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn resume_rebaselines_clock() {
        let mut s = Scheduler::new(SchedulerConfig::default());
        let t0 = Instant::now();
        s.frame(t0);
        s.pause();
        assert_eq!(s.frame(t0 + Duration::from_secs(60)), None);
        s.resume();
        assert_eq!(s.frame(t0 + Duration::from_secs(120)), None);
        let dt = s.frame(t0 + Duration::from_millis(120_100));
        assert_relative_eq!(dt.unwrap_or_default(), 0.1, epsilon = 1e-9);
    }

    #[test]
    fn clamped_gap_at_top_speed_is_the_max_frame() {
        let config = SchedulerConfig::default();
        assert_relative_eq!(config.max_frame(), 25.0, epsilon = 1e-9);
        let mut s = Scheduler::new(config.clone());
        s.set_speed(1_000.0);
        let t0 = Instant::now();
        s.frame(t0);
        let dt = s.frame(t0 + Duration::from_secs(10));
        assert_relative_eq!(dt.unwrap_or_default(), config.max_frame(), epsilon = 1e-9);
    }

    #[test]
    fn speed_is_clamped() {
        let mut s = Scheduler::new(SchedulerConfig::default());
        s.set_speed(500.0);
        assert_eq!(s.speed(), 50.0);
        s.set_speed(0.0);
        assert_eq!(s.speed(), 0.1);
    }
}
