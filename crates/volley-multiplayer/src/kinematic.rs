//! Deterministic straight-line projectile paths derived from fire records.
//!
//! A [`FireRecord`] replaces per-tick position sync: every peer that holds
//! the same record computes the same position for any (fractional) tick.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::clock::Tick;
use crate::timer::TickTimer;

/// Launch parameters plus the outcome fields of one projectile.
///
/// `fire_tick`, `fire_position` and `fire_velocity` never change after
/// creation. `destroyed` and `hit_position` are written at most once, by the
/// state authority or by the predicting peer before confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FireRecord {
    /// Tick the projectile was fired on.
    pub fire_tick: Tick,
    /// Launch point.
    pub fire_position: Vec3,
    /// Constant velocity in meters per second.
    pub fire_velocity: Vec3,
    /// Lifetime, replaced by the linger window after a hit.
    pub life: TickTimer,
    /// Set when the projectile hit something.
    pub destroyed: bool,
    /// Where it hit.
    pub hit_position: Option<Vec3>,
}

/// Where a record is in its lifecycle at a given tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectilePhase {
    /// At or before the fire tick; still at the launch point.
    Fired,
    /// Travelling along its path.
    Flying,
    /// Hit something and is lingering for the hit effect.
    Hit,
    /// Lifetime or linger window elapsed; the backing object or slot is
    /// retired.
    Destroyed,
}

impl FireRecord {
    /// A fresh record fired at `tick`.
    pub fn new(tick: Tick, position: Vec3, velocity: Vec3, life: TickTimer) -> Self {
        Self {
            fire_tick: tick,
            fire_position: position,
            fire_velocity: velocity,
            life,
            destroyed: false,
            hit_position: None,
        }
    }

    /// Position at a fractional tick. Clamps to the launch point at or before
    /// the fire tick.
    pub fn position_at(&self, tick: f64, delta_time: f32) -> Vec3 {
        let elapsed_ticks = tick - self.fire_tick as f64;
        if elapsed_ticks <= 0.0 {
            return self.fire_position;
        }
        let seconds = (elapsed_ticks * f64::from(delta_time)) as f32;
        self.fire_position + self.fire_velocity * seconds
    }

    /// Path travelled during `tick`: from the position at `tick - 1` to the
    /// position at `tick`.
    pub fn segment(&self, tick: Tick, delta_time: f32) -> (Vec3, Vec3) {
        let end = tick as f64;
        (
            self.position_at(end - 1.0, delta_time),
            self.position_at(end, delta_time),
        )
    }

    /// Marks the hit. Has no effect on a record that already hit.
    pub fn record_hit(&mut self, point: Vec3, linger: TickTimer) -> bool {
        if self.destroyed {
            return false;
        }
        self.destroyed = true;
        self.hit_position = Some(point);
        self.life = linger;
        true
    }

    /// Lifecycle phase at `tick`.
    pub fn phase(&self, tick: Tick) -> ProjectilePhase {
        if self.life.expired(tick) {
            ProjectilePhase::Destroyed
        } else if self.destroyed {
            ProjectilePhase::Hit
        } else if tick <= self.fire_tick {
            ProjectilePhase::Fired
        } else {
            ProjectilePhase::Flying
        }
    }
}
