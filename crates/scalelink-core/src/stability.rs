//! Stability filter
//!
//! Debounces raw readings into settled [`StableWeight`] values.
//!
//! - A reading carrying a device stability flag is authoritative: a stable
//!   flag settles immediately, an unstable one clears the window.
//! - Otherwise the last `window` readings must all lie within `tolerance_kg`
//!   of each other.
//! - A settled value within tolerance of the previous one is not published
//!   again; instead the heartbeat re-publishes the current value once
//!   `heartbeat` has passed, provided readings are still arriving.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::StabilityConfig;
use crate::reading::{StableWeight, WeightReading};

/// Slack for float comparisons against the tolerance
const EPSILON_KG: f64 = 1e-9;

/// Rolling-window debounce over raw readings
#[derive(Debug, Clone)]
pub struct StabilityFilter {
    window: usize,
    tolerance_kg: f64,
    heartbeat: Duration,
    /// Most recent readings, oldest first
    recent: VecDeque<WeightReading>,
    last: Option<StableWeight>,
    last_emit_at: Option<Instant>,
    /// A raw reading arrived since the last publication
    fed_since_emit: bool,
}

impl StabilityFilter {
    pub fn new(window: usize, tolerance_kg: f64, heartbeat: Duration) -> Self {
        let window = window.max(1);
        Self {
            window,
            tolerance_kg,
            heartbeat,
            recent: VecDeque::with_capacity(window),
            last: None,
            last_emit_at: None,
            fed_since_emit: false,
        }
    }

    pub fn from_config(config: &StabilityConfig) -> Self {
        Self::new(config.window, config.tolerance_kg, config.heartbeat())
    }

    /// Continue numbering after a previously published value
    pub fn resume_from(mut self, last: Option<StableWeight>) -> Self {
        self.last = last;
        self
    }

    /// Latest published value
    pub fn current(&self) -> Option<StableWeight> {
        self.last
    }

    /// Forget buffered readings (the published value is kept)
    pub fn clear_window(&mut self) {
        self.recent.clear();
    }

    /// Feed one reading; returns a new settled value if one was produced
    pub fn push(&mut self, reading: WeightReading, now: Instant) -> Option<StableWeight> {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(reading);
        self.fed_since_emit = true;

        let settled = if reading.has_device_flag() {
            if !reading.stable {
                self.recent.clear();
                return None;
            }
            reading
        } else {
            let within_tolerance = self.spread_kg() <= self.tolerance_kg + EPSILON_KG;
            if self.recent.len() < self.window || !within_tolerance {
                return None;
            }
            WeightReading {
                stable: true,
                ..reading
            }
        };

        if let Some(last) = &self.last {
            let delta = (last.kilograms() - settled.kilograms()).abs();
            if delta <= self.tolerance_kg + EPSILON_KG {
                return None;
            }
        }

        Some(self.publish(settled, false, now))
    }

    /// Heartbeat check; call periodically from the acquisition loop
    pub fn tick(&mut self, now: Instant) -> Option<StableWeight> {
        if self.heartbeat.is_zero() || !self.fed_since_emit {
            return None;
        }
        let last = self.last?;
        let due = match self.last_emit_at {
            Some(at) => now.saturating_duration_since(at) >= self.heartbeat,
            // Resumed value never published by this filter
            None => true,
        };
        if !due {
            return None;
        }
        Some(self.publish(last.reading, true, now))
    }

    fn publish(&mut self, reading: WeightReading, heartbeat: bool, now: Instant) -> StableWeight {
        let sequence = self.last.map_or(1, |s| s.sequence + 1);
        let stable = StableWeight {
            reading,
            sequence,
            heartbeat,
        };
        self.last = Some(stable);
        self.last_emit_at = Some(now);
        self.fed_since_emit = false;
        stable
    }

    fn spread_kg(&self) -> f64 {
        let (min, max) = self
            .recent
            .iter()
            .map(WeightReading::kilograms)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        max - min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{StabilitySource, WeightUnit};
    use chrono::Utc;

    fn inferred(value: f64) -> WeightReading {
        WeightReading {
            value,
            unit: WeightUnit::Kilogram,
            stable: false,
            source: StabilitySource::Inferred,
            timestamp: Utc::now(),
        }
    }

    fn flagged(value: f64, stable: bool) -> WeightReading {
        WeightReading {
            stable,
            source: StabilitySource::Device,
            ..inferred(value)
        }
    }

    #[test]
    fn test_non_finite_window_never_settles() {
        let mut filter = StabilityFilter::new(2, 0.005, Duration::ZERO);
        let now = Instant::now();
        assert!(filter.push(inferred(f64::INFINITY), now).is_none());
        assert!(filter.push(inferred(f64::INFINITY), now).is_none());
        assert!(filter.push(inferred(f64::NAN), now).is_none());
        assert!(filter.current().is_none());
    }

    #[test]
    fn test_device_flag_is_authoritative() {
        let mut filter = StabilityFilter::new(5, 0.005, Duration::ZERO);
        let now = Instant::now();
        assert!(filter.push(flagged(3.0, false), now).is_none());
        let out = filter.push(flagged(3.2, true), now).unwrap();
        assert_eq!(out.reading.value, 3.2);
        assert_eq!(out.sequence, 1);
        assert!(!out.heartbeat);
    }

    #[test]
    fn test_repeated_value_not_republished() {
        let mut filter = StabilityFilter::new(3, 0.005, Duration::ZERO);
        let now = Instant::now();
        assert!(filter.push(flagged(3.2, true), now).is_some());
        assert!(filter.push(flagged(3.2, true), now).is_none());
        assert!(filter.push(flagged(3.203, true), now).is_none());
        let next = filter.push(flagged(4.0, true), now).unwrap();
        assert_eq!(next.sequence, 2);
    }

    #[test]
    fn test_moving_load_withheld() {
        let mut filter = StabilityFilter::new(3, 0.01, Duration::ZERO);
        let now = Instant::now();
        for v in [1.0, 2.0, 3.0, 3.5, 3.9] {
            assert!(filter.push(inferred(v), now).is_none());
        }
        assert!(filter.current().is_none());
    }

    #[test]
    fn test_tolerance_uses_kilograms() {
        let mut filter = StabilityFilter::new(2, 0.005, Duration::ZERO);
        let now = Instant::now();
        let grams = WeightReading {
            value: 1002.0,
            unit: WeightUnit::Gram,
            ..inferred(0.0)
        };
        assert!(filter.push(inferred(1.0), now).is_none());
        let out = filter.push(grams, now).unwrap();
        assert_eq!(out.reading.unit, WeightUnit::Gram);
        assert!(out.reading.stable);
    }

    #[test]
    fn test_heartbeat_requires_live_feed() {
        let heartbeat = Duration::from_millis(100);
        let mut filter = StabilityFilter::new(1, 0.005, heartbeat);
        let t0 = Instant::now();
        let first = filter.push(flagged(5.0, true), t0).unwrap();

        // Nothing arrived since: no heartbeat even when due
        assert!(filter.tick(t0 + heartbeat * 2).is_none());

        // Same value keeps arriving: heartbeat once the interval passed
        assert!(filter.push(flagged(5.0, true), t0 + heartbeat / 2).is_none());
        assert!(filter.tick(t0 + heartbeat / 2).is_none());
        let beat = filter.tick(t0 + heartbeat).unwrap();
        assert!(beat.heartbeat);
        assert_eq!(beat.reading, first.reading);
        assert_eq!(beat.sequence, first.sequence + 1);
    }

    #[test]
    fn test_resume_continues_sequence() {
        let mut first = StabilityFilter::new(1, 0.005, Duration::ZERO);
        let now = Instant::now();
        let last = first.push(flagged(1.0, true), now);

        let mut second = StabilityFilter::new(1, 0.005, Duration::ZERO).resume_from(last);
        let next = second.push(flagged(2.0, true), now).unwrap();
        assert_eq!(next.sequence, 2);
    }
}
