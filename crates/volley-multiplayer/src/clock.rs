//! Shared simulation clock and render timing.
//!
//! Every peer advances the same discrete tick counter at a fixed rate. The
//! [`TickSchedule`] turns variable frame time into whole ticks plus a render
//! `alpha`, and [`RenderTime`] derives the two time frames visuals are drawn
//! in: the local simulation frame for authority/input holders and the
//! interpolated remote frame for proxies.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Discrete simulation time.
pub type Tick = u64;

/// Default tick rate shared by clients and server.
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Maximum frame time fed into a [`TickSchedule`], in seconds.
pub const MAX_FRAME_TIME: f64 = 0.25;

/// Number of whole ticks covering `seconds` at `tick_rate`, rounded up.
///
/// Returns `None` for zero or negative durations.
pub fn ticks_for(seconds: f32, tick_rate: u32) -> Option<u64> {
    if !(seconds > 0.0) {
        return None;
    }
    let exact = f64::from(seconds) * f64::from(tick_rate.max(1));
    // Absorb float noise so 4.0 s at 60 Hz is 240 ticks, not 241. Any
    // positive duration lasts at least one tick.
    Some(((exact - 1e-6).ceil() as u64).max(1))
}

/// Monotonic tick counter with a fixed tick duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickClock {
    tick: Tick,
    tick_rate: u32,
}

impl TickClock {
    /// Creates a clock at tick 0.
    pub fn new(tick_rate: u32) -> Self {
        Self::starting_at(0, tick_rate)
    }

    /// Creates a clock whose last simulated tick is `tick`.
    pub fn starting_at(tick: Tick, tick_rate: u32) -> Self {
        Self {
            tick,
            tick_rate: tick_rate.max(1),
        }
    }

    /// Last simulated tick.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Ticks per second.
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Seconds per tick.
    pub fn delta_time(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Advances to the next tick and returns it.
    pub fn advance(&mut self) -> Tick {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    /// Converts a duration into ticks at this clock's rate.
    pub fn seconds_to_ticks(&self, seconds: f32) -> Option<u64> {
        ticks_for(seconds, self.tick_rate)
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}

/// Fixed-rate tick scheduler driven by variable frame time.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    accumulator_secs: f64,
    tick_duration_secs: f64,
    total_ticks: u64,
}

impl TickSchedule {
    /// Creates a schedule at `tick_rate` Hz.
    pub fn new(tick_rate: u32) -> Self {
        Self {
            accumulator_secs: 0.0,
            tick_duration_secs: 1.0 / f64::from(tick_rate.max(1)),
            total_ticks: 0,
        }
    }

    /// Accumulates a frame's elapsed time and returns the number of ticks to
    /// simulate before rendering it.
    pub fn accumulate(&mut self, frame_secs: f64) -> u32 {
        let mut frame_secs = frame_secs.max(0.0);
        if frame_secs > MAX_FRAME_TIME {
            warn!(
                "Frame time {:.1}ms exceeds maximum, clamping to {:.1}ms",
                frame_secs * 1000.0,
                MAX_FRAME_TIME * 1000.0
            );
            frame_secs = MAX_FRAME_TIME;
        }

        self.accumulator_secs += frame_secs;
        let mut ticks = 0u32;
        while self.accumulator_secs >= self.tick_duration_secs {
            self.accumulator_secs -= self.tick_duration_secs;
            self.total_ticks += 1;
            ticks += 1;
        }
        ticks
    }

    /// Fraction of a tick accumulated since the last simulated tick, in
    /// `[0, 1)`.
    pub fn alpha(&self) -> f64 {
        (self.accumulator_secs / self.tick_duration_secs).clamp(0.0, 1.0)
    }

    /// Total ticks produced since creation.
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Tick duration in seconds.
    pub fn tick_duration_secs(&self) -> f64 {
        self.tick_duration_secs
    }
}

/// The two render time frames, in fractional ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTime {
    /// Local simulation frame: the latest simulated tick blended by alpha.
    pub local_tick: f64,
    /// Remote interpolation frame: trails the newest confirmed state.
    pub remote_tick: f64,
}

impl RenderTime {
    /// Derives both frames.
    ///
    /// `local_tick = latest - 1 + alpha`,
    /// `remote_tick = latest_confirmed - 1 + alpha - interpolation_delay`,
    /// both clamped at zero.
    pub fn new(latest: Tick, latest_confirmed: Tick, alpha: f64, interpolation_delay: f64) -> Self {
        let alpha = alpha.clamp(0.0, 1.0);
        Self {
            local_tick: (latest as f64 - 1.0 + alpha).max(0.0),
            remote_tick: (latest_confirmed as f64 - 1.0 + alpha - interpolation_delay).max(0.0),
        }
    }

    /// Both frames at the same tick; used by peers that have no proxies.
    pub fn uniform(tick: f64) -> Self {
        Self {
            local_tick: tick,
            remote_tick: tick,
        }
    }

    /// The frame an object should be drawn in.
    pub fn for_proxy(&self, is_proxy: bool) -> f64 {
        if is_proxy {
            self.remote_tick
        } else {
            self.local_tick
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_seconds_is_240_ticks() {
        assert_eq!(ticks_for(4.0, 60), Some(240));
        assert_eq!(ticks_for(2.0, 60), Some(120));
    }

    #[test]
    fn test_partial_tick_rounds_up() {
        assert_eq!(ticks_for(0.01, 60), Some(1));
        assert_eq!(ticks_for(0.02, 60), Some(2));
    }

    #[test]
    fn test_tiny_positive_duration_lasts_one_tick() {
        assert_eq!(ticks_for(1e-8, 60), Some(1));
        assert_eq!(ticks_for(f32::MIN_POSITIVE, 1), Some(1));
    }

    #[test]
    fn test_non_positive_duration_has_no_ticks() {
        assert_eq!(ticks_for(0.0, 60), None);
        assert_eq!(ticks_for(-1.0, 60), None);
        assert_eq!(ticks_for(f32::NAN, 60), None);
    }

    #[test]
    fn test_tick_numbers_are_monotonic() {
        let mut clock = TickClock::new(60);
        let mut prev = clock.tick();
        for _ in 0..1000 {
            let tick = clock.advance();
            assert!(tick > prev, "tick must be monotonic: {tick} <= {prev}");
            prev = tick;
        }
        assert_eq!(clock.tick(), 1000);
    }

    #[test]
    fn test_delta_time_matches_rate() {
        let clock = TickClock::new(30);
        assert!((clock.delta_time() - 1.0 / 30.0).abs() < 1e-7);
        assert_eq!(clock.seconds_to_ticks(1.0), Some(30));
    }

    #[test]
    fn test_schedule_accumulates_whole_ticks() {
        let mut schedule = TickSchedule::new(60);
        let dt = schedule.tick_duration_secs();
        assert_eq!(schedule.accumulate(dt * 2.5), 2);
        assert!((schedule.alpha() - 0.5).abs() < 1e-9);
        assert_eq!(schedule.accumulate(dt * 0.75), 1);
        assert_eq!(schedule.total_ticks(), 3);
        assert!((schedule.alpha() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_schedule_clamps_long_frames() {
        // One second would be 4 ticks at 4 Hz; the clamp allows one.
        let mut schedule = TickSchedule::new(4);
        assert_eq!(schedule.accumulate(1.0), 1);
        assert_eq!(schedule.alpha(), 0.0);
    }

    #[test]
    fn test_render_time_frames() {
        let time = RenderTime::new(100, 94, 0.25, 2.0);
        assert!((time.local_tick - 99.25).abs() < 1e-9);
        assert!((time.remote_tick - 91.25).abs() < 1e-9);
        assert_eq!(time.for_proxy(false), time.local_tick);
        assert_eq!(time.for_proxy(true), time.remote_tick);
    }

    #[test]
    fn test_render_time_clamps_at_zero() {
        let time = RenderTime::new(0, 0, 0.0, 2.0);
        assert_eq!(time.local_tick, 0.0);
        assert_eq!(time.remote_tick, 0.0);
    }
}
