//! Cooldown timer stored as plain replicated data.

use serde::{Deserialize, Serialize};

use crate::clock::{Tick, ticks_for};

/// Records the tick at which a cooldown expires.
///
/// A timer without expiry never expires. Once [`expired`](Self::expired)
/// reports `true` it stays `true` for every later tick; the owner acts on it
/// and then replaces or clears the timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickTimer {
    expiry: Option<Tick>,
}

impl TickTimer {
    /// A timer that never expires.
    pub const NONE: TickTimer = TickTimer { expiry: None };

    /// Starts a timer at `now` lasting `seconds`, rounded up to whole ticks.
    /// Zero or negative durations yield [`TickTimer::NONE`].
    pub fn create(now: Tick, seconds: f32, tick_rate: u32) -> Self {
        match ticks_for(seconds, tick_rate) {
            Some(ticks) => Self::from_ticks(now, ticks),
            None => Self::NONE,
        }
    }

    /// Starts a timer that expires `ticks` after `now`.
    pub fn from_ticks(now: Tick, ticks: u64) -> Self {
        Self {
            expiry: Some(now.saturating_add(ticks)),
        }
    }

    /// Whether an expiry is set.
    pub fn is_running(&self) -> bool {
        self.expiry.is_some()
    }

    /// Whether the timer is running and `now` has reached its expiry.
    pub fn expired(&self, now: Tick) -> bool {
        self.expiry.is_some_and(|expiry| now >= expiry)
    }

    /// Whether the expiry lies strictly before a fractional render tick.
    pub fn finished_before(&self, tick: f64) -> bool {
        self.expiry.is_some_and(|expiry| (expiry as f64) < tick)
    }

    /// Ticks left until expiry, `None` when not running.
    pub fn remaining(&self, now: Tick) -> Option<u64> {
        self.expiry.map(|expiry| expiry.saturating_sub(now))
    }

    /// The expiry tick, if any.
    pub fn expiry_tick(&self) -> Option<Tick> {
        self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rounds_up_to_ticks() {
        let timer = TickTimer::create(100, 4.0, 60);
        assert_eq!(timer.expiry_tick(), Some(340));
        assert!(!timer.expired(339));
        assert!(timer.expired(340));
    }

    #[test]
    fn test_tiny_duration_is_not_expired_on_creation() {
        let timer = TickTimer::create(100, 1e-8, 60);
        assert!(!timer.expired(100));
        assert!(timer.expired(101));
    }

    #[test]
    fn test_zero_duration_never_expires() {
        let timer = TickTimer::create(10, 0.0, 60);
        assert!(!timer.is_running());
        assert!(!timer.expired(u64::MAX));
        assert_eq!(TickTimer::create(10, -3.0, 60), TickTimer::NONE);
    }

    #[test]
    fn test_expired_is_monotone() {
        let timer = TickTimer::from_ticks(5, 3);
        let mut seen = false;
        for tick in 0..50 {
            let expired = timer.expired(tick);
            if seen {
                assert!(expired, "timer un-expired at tick {tick}");
            }
            seen |= expired;
        }
        assert!(seen);
    }

    #[test]
    fn test_remaining() {
        let timer = TickTimer::from_ticks(10, 5);
        assert_eq!(timer.remaining(12), Some(3));
        assert_eq!(timer.remaining(20), Some(0));
        assert_eq!(TickTimer::NONE.remaining(0), None);
    }

    #[test]
    fn test_finished_before_render_tick() {
        let timer = TickTimer::from_ticks(0, 10);
        assert!(!timer.finished_before(10.0));
        assert!(timer.finished_before(10.5));
        assert!(!TickTimer::NONE.finished_before(1e12));
    }

    #[test]
    fn test_timer_serializes_as_plain_data() {
        let timer = TickTimer::from_ticks(7, 3);
        let json = serde_json::to_string(&timer).unwrap();
        let back: TickTimer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, timer);
    }
}
