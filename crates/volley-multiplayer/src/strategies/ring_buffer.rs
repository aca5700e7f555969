//! Ring-buffered replication: a weapon keeps a fixed number of fire records
//! in its own replicated state. Projectiles are never networked objects; a
//! new fire reuses slot `fire_index % capacity`, retiring whatever was there.

use std::any::Any;
use std::ops::Range;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FireStrategy, Shot};
use crate::behaviour::{RenderContext, SimContext, StrategyKind};
use crate::clock::Tick;
use crate::error::NetcodeError;
use crate::kinematic::FireRecord;
use crate::lag_compensation::{ImpulseGate, PendingImpulse, advance_record, apply_gated};
use crate::replicated::Replicated;
use crate::replication::{decode, encode};
use crate::timer::TickTimer;
use crate::visuals::{VisualId, VisualKind, VisualLayer};

/// One occupied ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RingSlot {
    /// Fire counter value of the shot stored here.
    pub fire_index: u32,
    /// The shot's record.
    pub record: FireRecord,
}

/// Fixed-capacity ring of fire records plus the peer-local visual per slot.
#[derive(Debug, Clone)]
pub struct RingBufferStrategy {
    slots: Replicated<Vec<Option<RingSlot>>>,
    visuals: Vec<Option<VisualId>>,
}

impl RingBufferStrategy {
    /// A ring with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Replicated::new(vec![None; capacity]),
            visuals: vec![None; capacity],
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.get().len()
    }

    /// Slot contents.
    pub fn slots(&self) -> &[Option<RingSlot>] {
        self.slots.get()
    }

    /// Slots whose record has not expired at `tick`.
    pub fn active_slots(&self, tick: Tick) -> usize {
        self.slots
            .get()
            .iter()
            .flatten()
            .filter(|slot| !slot.record.life.expired(tick))
            .count()
    }

    /// Live slot visuals.
    pub fn visual_count(&self) -> usize {
        self.visuals.iter().flatten().count()
    }
}

impl FireStrategy for RingBufferStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RingBuffer
    }

    fn fire(&mut self, shot: &Shot, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        let index = shot.index as usize % self.capacity();
        let weapon = &ctx.tuning.weapon;
        let record = FireRecord::new(
            ctx.tick,
            shot.origin,
            shot.direction.normalize_or_zero() * weapon.speed,
            TickTimer::create(ctx.tick, weapon.lifetime_secs, ctx.tuning.tick_rate),
        );
        let tick = ctx.tick;
        let previous = self.slots.modify(&ctx.authority, "ring_slots", |slots| {
            slots[index].replace(RingSlot {
                fire_index: shot.index,
                record,
            })
        })?;
        if let Some(previous) = previous
            && !previous.record.life.expired(tick)
        {
            debug!(
                slot = index,
                retired = previous.fire_index,
                fire_index = shot.index,
                "ring slot overwritten in flight"
            );
        }
        Ok(())
    }

    fn fixed_update(&mut self, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        let params = ctx.tuning.resolve_params();
        let filter = ctx.shot_filter();

        let mut changed: Vec<(usize, FireRecord)> = Vec::new();
        let mut impulses: Vec<PendingImpulse> = Vec::new();
        for (index, slot) in self.slots.get().iter().enumerate() {
            let Some(slot) = slot else {
                continue;
            };
            if slot.record.life.expired(ctx.tick) {
                continue;
            }
            let step = advance_record(&slot.record, ctx.tick, &params, &*ctx.world, &filter);
            if step.record != slot.record {
                changed.push((index, step.record));
            }
            impulses.extend(step.impulse);
        }

        if !changed.is_empty() {
            self.slots.modify(&ctx.authority, "ring_slots", |slots| {
                for (index, record) in changed {
                    if let Some(slot) = slots[index].as_mut() {
                        slot.record = record;
                    }
                }
            })?;
        }
        let gate = ImpulseGate::for_authority(&ctx.authority);
        for impulse in impulses {
            apply_gated(ctx.world, impulse, gate);
        }
        Ok(())
    }

    fn render(&mut self, fresh: Range<u32>, _muzzle: Vec3, ctx: &mut RenderContext<'_>) {
        let capacity = self.capacity();
        self.visuals.resize(capacity, None);
        let slots = self.slots.get();

        for fire_index in fresh {
            let index = fire_index as usize % capacity;
            // Already overwritten by a later fire in the same batch.
            let Some(slot) = slots[index].filter(|s| s.fire_index == fire_index) else {
                continue;
            };
            if let Some(previous) = self.visuals[index].take() {
                ctx.visuals.destroy(previous);
            }
            self.visuals[index] = Some(
                ctx.visuals
                    .spawn(VisualKind::Dummy, slot.record.fire_position),
            );
        }

        let tick = ctx.render_tick();
        let delta_time = ctx.tuning.delta_time();
        for (index, visual) in self.visuals.iter_mut().enumerate() {
            let Some(id) = *visual else {
                continue;
            };
            match slots[index] {
                Some(slot) if !slot.record.life.finished_before(tick) => {
                    if let Some(point) = slot.record.hit_position {
                        ctx.visuals.set_position(id, point);
                        ctx.visuals.show_hit(id);
                    } else {
                        ctx.visuals
                            .set_position(id, slot.record.position_at(tick, delta_time));
                    }
                }
                _ => {
                    ctx.visuals.destroy(id);
                    *visual = None;
                }
            }
        }
    }

    fn write_state(&self) -> Result<Vec<u8>, NetcodeError> {
        encode("ring slots", self.slots.get())
    }

    fn read_state(&mut self, bytes: &[u8]) -> Result<(), NetcodeError> {
        let slots: Vec<Option<RingSlot>> = decode("ring slots", bytes)?;
        self.slots.overwrite(slots);
        Ok(())
    }

    fn despawned(&mut self, visuals: &mut VisualLayer) {
        for visual in self.visuals.iter_mut().filter_map(Option::take) {
            visuals.destroy(visual);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
