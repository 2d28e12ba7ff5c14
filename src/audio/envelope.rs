//! Linear control envelopes
//!
//! A ramp moves a control (volume or speed) from a start value to a target
//! over a fixed duration, optionally after an initial hold. The drivers
//! sample ramps on a coarse tick; the math is kept separate so it can be
//! tested without a clock.

use std::time::Duration;

/// A linear ramp between two control values
#[derive(Debug, Clone, PartialEq)]
pub struct Ramp {
    /// Control value before and at the ramp start
    pub from: f64,
    /// Control value at and after the ramp end
    pub to: f64,
    /// Hold period before the ramp begins
    pub start_after: Duration,
    /// Ramp length; zero jumps straight to the target
    pub duration: Duration,
}

impl Ramp {
    pub fn new(from: f64, to: f64, duration: Duration) -> Self {
        Self {
            from,
            to,
            start_after: Duration::ZERO,
            duration,
        }
    }

    pub fn with_start_after(mut self, start_after: Duration) -> Self {
        self.start_after = start_after;
        self
    }

    /// Sample the ramp at `elapsed` since installation
    pub fn value_at(&self, elapsed: Duration) -> f64 {
        if elapsed <= self.start_after {
            return self.from;
        }
        let into = elapsed - self.start_after;
        if self.duration.is_zero() || into >= self.duration {
            return self.to;
        }
        let progress = into.as_secs_f64() / self.duration.as_secs_f64();
        self.from + (self.to - self.from) * progress
    }

    /// Whether the ramp has reached its target at `elapsed`
    pub fn finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.start_after + self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_interpolates_linearly() {
        let ramp = Ramp::new(0.0, 1.0, Duration::from_millis(1000));
        assert_eq!(ramp.value_at(Duration::ZERO), 0.0);
        let mid = ramp.value_at(Duration::from_millis(500));
        assert!((mid - 0.5).abs() < 0.01);
        assert_eq!(ramp.value_at(Duration::from_millis(1000)), 1.0);
        assert_eq!(ramp.value_at(Duration::from_millis(1500)), 1.0);
    }

    #[test]
    fn ramp_descends() {
        let ramp = Ramp::new(0.8, 0.0, Duration::from_millis(400));
        let quarter = ramp.value_at(Duration::from_millis(100));
        assert!((quarter - 0.6).abs() < 0.01);
        assert_eq!(ramp.value_at(Duration::from_millis(400)), 0.0);
    }

    #[test]
    fn hold_period_delays_the_ramp() {
        let ramp = Ramp::new(0.0, 1.0, Duration::from_millis(200))
            .with_start_after(Duration::from_millis(300));
        assert_eq!(ramp.value_at(Duration::from_millis(299)), 0.0);
        assert!(!ramp.finished(Duration::from_millis(400)));
        assert_eq!(ramp.value_at(Duration::from_millis(500)), 1.0);
        assert!(ramp.finished(Duration::from_millis(500)));
    }

    #[test]
    fn zero_duration_jumps_to_target() {
        let ramp = Ramp::new(0.3, 0.9, Duration::ZERO);
        assert_eq!(ramp.value_at(Duration::from_nanos(1)), 0.9);
        assert!(ramp.finished(Duration::ZERO));
    }
}
