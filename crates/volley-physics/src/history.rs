//! Per-hitbox position history for lag-compensated queries.

use std::collections::VecDeque;

use glam::Vec3;

/// A recorded hitbox position at a simulation tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistorySample {
    /// Tick the sample was recorded at.
    pub tick: u64,
    /// Hitbox center at that tick.
    pub center: Vec3,
}

/// Bounded ring of [`HistorySample`]s ordered by tick.
#[derive(Clone, Debug)]
pub struct HitboxHistory {
    samples: VecDeque<HistorySample>,
    capacity: usize,
}

impl HitboxHistory {
    /// Creates an empty history that keeps at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records the center for `tick`. Re-recording the newest tick replaces
    /// it; samples older than the newest one are ignored.
    pub fn record(&mut self, tick: u64, center: Vec3) {
        if let Some(last) = self.samples.back_mut() {
            if tick < last.tick {
                return;
            }
            if tick == last.tick {
                last.center = center;
                return;
            }
        }
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(HistorySample { tick, center });
    }

    /// Center at a (fractional) tick. Interpolates between the bracketing
    /// samples and clamps to the oldest/newest sample outside the window.
    pub fn sample_at(&self, tick: f64) -> Option<Vec3> {
        let first = self.samples.front()?;
        let last = self.samples.back()?;

        if tick <= first.tick as f64 {
            return Some(first.center);
        }
        if tick >= last.tick as f64 {
            return Some(last.center);
        }

        // First sample strictly after `tick`; the one before it brackets.
        let upper = self.samples.partition_point(|s| (s.tick as f64) <= tick);
        let after = self.samples[upper];
        let before = self.samples[upper - 1];

        let span = (after.tick - before.tick) as f64;
        let alpha = ((tick - before.tick as f64) / span) as f32;
        Some(before.center.lerp(after.center, alpha))
    }

    /// Oldest and newest recorded ticks.
    pub fn window(&self) -> Option<(u64, u64)> {
        Some((self.samples.front()?.tick, self.samples.back()?.tick))
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_with(points: &[(u64, f32)]) -> HitboxHistory {
        let mut history = HitboxHistory::new(16);
        for &(tick, x) in points {
            history.record(tick, Vec3::new(x, 0.0, 0.0));
        }
        history
    }

    #[test]
    fn test_empty_history_has_no_sample() {
        assert!(HitboxHistory::new(4).sample_at(3.0).is_none());
    }

    #[test]
    fn test_exact_tick_returns_recorded_center() {
        let history = history_with(&[(10, 1.0), (11, 2.0), (12, 3.0)]);
        assert_eq!(history.sample_at(11.0), Some(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_fractional_tick_interpolates() {
        let history = history_with(&[(10, 0.0), (11, 4.0)]);
        let center = history.sample_at(10.25).unwrap();
        assert!((center.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_out_of_window_clamps() {
        let history = history_with(&[(10, 1.0), (20, 5.0)]);
        assert_eq!(history.sample_at(2.0).unwrap().x, 1.0);
        assert_eq!(history.sample_at(99.0).unwrap().x, 5.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = HitboxHistory::new(3);
        for tick in 0..10 {
            history.record(tick, Vec3::ZERO);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.window(), Some((7, 9)));
    }

    #[test]
    fn test_rerecording_same_tick_replaces() {
        let mut history = history_with(&[(5, 1.0)]);
        history.record(5, Vec3::new(9.0, 0.0, 0.0));
        assert_eq!(history.len(), 1);
        assert_eq!(history.sample_at(5.0).unwrap().x, 9.0);
    }

    #[test]
    fn test_older_tick_is_ignored() {
        let mut history = history_with(&[(5, 1.0), (6, 2.0)]);
        history.record(4, Vec3::new(100.0, 0.0, 0.0));
        assert_eq!(history.window(), Some((5, 6)));
    }
}
