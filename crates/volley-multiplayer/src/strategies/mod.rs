//! The four ways a weapon replicates what it fires.
//!
//! A [`WeaponController`](crate::weapon::WeaponController) owns the fire
//! counter and edge-triggers fire events; everything that differs between
//! replication schemes lives behind [`FireStrategy`].

mod count_only;
mod fire_data;
mod full_state;
mod ring_buffer;

use std::any::Any;
use std::fmt;
use std::ops::Range;

use glam::Vec3;

use crate::behaviour::{RenderContext, SimContext, StrategyKind, Tuning};
use crate::error::NetcodeError;
use crate::replication::NetworkId;
use crate::visuals::VisualLayer;

pub use count_only::{CountOnlyStrategy, LastShot};
pub use fire_data::{FireDataProjectile, FireDataStrategy};
pub use full_state::{FullStateStrategy, PhysicsProjectile, PhysicsState};
pub use ring_buffer::{RingBufferStrategy, RingSlot};

/// One fire event handed to a strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot {
    /// Value of the fire counter before this event.
    pub index: u32,
    /// Muzzle position.
    pub origin: Vec3,
    /// Unit aim direction.
    pub direction: Vec3,
}

/// Strategy-specific half of a weapon.
pub trait FireStrategy: fmt::Debug {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Handles one fire event on a peer that may write weapon state.
    fn fire(&mut self, shot: &Shot, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError>;

    /// Per-tick work after input handling.
    fn fixed_update(&mut self, _ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        Ok(())
    }

    /// Presents fire events in `fresh` (not shown on this peer yet) and
    /// updates persistent visuals.
    fn render(&mut self, _fresh: Range<u32>, _muzzle: Vec3, _ctx: &mut RenderContext<'_>) {}

    /// Strategy-owned replicated state.
    fn write_state(&self) -> Result<Vec<u8>, NetcodeError> {
        Ok(Vec::new())
    }

    /// Applies confirmed strategy state.
    fn read_state(&mut self, _bytes: &[u8]) -> Result<(), NetcodeError> {
        Ok(())
    }

    /// The authority spawned `id` into pool slot `slot`.
    fn attach_pooled(&mut self, _slot: usize, _id: NetworkId) {}

    /// The weapon is leaving this peer.
    fn despawned(&mut self, _visuals: &mut VisualLayer) {}

    /// Downcasting support.
    fn as_any(&self) -> &dyn Any;
}

/// Builds the strategy for `kind`.
pub fn strategy_for(kind: StrategyKind, tuning: &Tuning) -> Box<dyn FireStrategy> {
    match kind {
        StrategyKind::FullState => {
            Box::new(FullStateStrategy::new(tuning.weapon.projectile_pool_size))
        }
        StrategyKind::FireData => Box::new(FireDataStrategy),
        StrategyKind::CountOnly => Box::new(CountOnlyStrategy::default()),
        StrategyKind::RingBuffer => Box::new(RingBufferStrategy::new(tuning.weapon.ring_capacity)),
    }
}
