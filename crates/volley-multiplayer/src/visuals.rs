//! Peer-local visual objects.
//!
//! Projectile visuals, cosmetic dummies and one-shot effects are owned by a
//! single peer and never replicated. Effects played during a frame are kept
//! as [`VisualEvent`]s for that frame and the next one; running tallies
//! outlive them.

use std::collections::BTreeMap;

use glam::Vec3;
use tracing::trace;

/// Handle to a visual in a [`VisualLayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisualId(pub u64);

/// What a visual represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualKind {
    /// Body of a networked projectile.
    Projectile,
    /// Ring-buffer slot visual driven by its fire record.
    Dummy,
    /// Self-propelled cosmetic projectile of the count-only weapon.
    FlyingDummy,
}

/// A one-shot effect or visual lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VisualEvent {
    /// Muzzle effect of a weapon.
    FireEffect {
        /// Index of the fire event that triggered it.
        fire_index: u32,
    },
    /// Impact effect.
    HitEffect {
        /// Where it played.
        position: Vec3,
    },
    /// A visual was created.
    Spawned {
        /// The visual.
        id: VisualId,
        /// Its kind.
        kind: VisualKind,
    },
    /// A visual was removed.
    Destroyed {
        /// The visual.
        id: VisualId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Driven,
    Flying {
        target: Vec3,
        speed: f32,
        show_hit: bool,
    },
}

/// State of one visual.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Visual {
    /// Kind of visual.
    pub kind: VisualKind,
    /// Current position.
    pub position: Vec3,
    /// The hit effect has played.
    pub hit_shown: bool,
    motion: Motion,
}

/// Totals of everything a layer has played since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectTally {
    /// Muzzle effects.
    pub fire_effects: usize,
    /// Impact effects.
    pub hit_effects: usize,
    /// Visuals created, indexed by [`VisualKind`].
    pub spawned: [usize; 3],
}

impl EffectTally {
    fn count(&mut self, event: &VisualEvent) {
        match *event {
            VisualEvent::FireEffect { .. } => self.fire_effects += 1,
            VisualEvent::HitEffect { .. } => self.hit_effects += 1,
            VisualEvent::Spawned { kind, .. } => self.spawned[kind as usize] += 1,
            VisualEvent::Destroyed { .. } => {}
        }
    }
}

/// Every visual a peer currently shows, plus the recent effect events.
///
/// Events are double-buffered: [`swap`](Self::swap) once per frame drops the
/// previous frame's events and makes the current ones previous.
#[derive(Debug, Clone, Default)]
pub struct VisualLayer {
    next_id: u64,
    visuals: BTreeMap<VisualId, Visual>,
    prev: Vec<VisualEvent>,
    current: Vec<VisualEvent>,
    tally: EffectTally,
}

impl VisualLayer {
    /// Creates an empty layer.
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, event: VisualEvent) {
        self.tally.count(&event);
        self.current.push(event);
    }

    fn insert(&mut self, kind: VisualKind, position: Vec3, motion: Motion) -> VisualId {
        self.next_id += 1;
        let id = VisualId(self.next_id);
        self.visuals.insert(
            id,
            Visual {
                kind,
                position,
                hit_shown: false,
                motion,
            },
        );
        self.emit(VisualEvent::Spawned { id, kind });
        trace!(id = id.0, ?kind, "visual spawned");
        id
    }

    /// Creates a visual positioned by its owner every frame.
    pub fn spawn(&mut self, kind: VisualKind, position: Vec3) -> VisualId {
        self.insert(kind, position, Motion::Driven)
    }

    /// Creates a dummy that flies from `from` to `target` on its own and is
    /// removed on arrival, playing a hit effect first if `show_hit`.
    pub fn spawn_flying(&mut self, from: Vec3, target: Vec3, speed: f32, show_hit: bool) -> VisualId {
        self.insert(
            VisualKind::FlyingDummy,
            from,
            Motion::Flying {
                target,
                speed,
                show_hit,
            },
        )
    }

    /// Moves a visual. Returns `false` if it no longer exists.
    pub fn set_position(&mut self, id: VisualId, position: Vec3) -> bool {
        match self.visuals.get_mut(&id) {
            Some(visual) => {
                visual.position = position;
                true
            }
            None => false,
        }
    }

    /// Plays the hit effect of a visual at its current position, once.
    pub fn show_hit(&mut self, id: VisualId) -> bool {
        let Some(visual) = self.visuals.get_mut(&id) else {
            return false;
        };
        if visual.hit_shown {
            return false;
        }
        visual.hit_shown = true;
        let position = visual.position;
        self.emit(VisualEvent::HitEffect { position });
        true
    }

    /// Plays a weapon's muzzle effect.
    pub fn fire_effect(&mut self, fire_index: u32) {
        self.emit(VisualEvent::FireEffect { fire_index });
    }

    /// Removes a visual.
    pub fn destroy(&mut self, id: VisualId) -> bool {
        if self.visuals.remove(&id).is_none() {
            return false;
        }
        self.emit(VisualEvent::Destroyed { id });
        trace!(id = id.0, "visual destroyed");
        true
    }

    /// Advances self-propelled dummies by one frame.
    pub fn update(&mut self, frame_dt: f32) {
        let mut arrived = Vec::new();
        for (&id, visual) in &mut self.visuals {
            let Motion::Flying {
                target,
                speed,
                show_hit,
            } = visual.motion
            else {
                continue;
            };
            let to_target = target - visual.position;
            let step = speed * frame_dt;
            if to_target.length() <= step {
                visual.position = target;
                arrived.push((id, show_hit));
            } else {
                visual.position += to_target.normalize_or_zero() * step;
            }
        }
        for (id, show_hit) in arrived {
            if show_hit {
                self.show_hit(id);
            }
            self.destroy(id);
        }
    }

    /// Looks up a visual.
    pub fn get(&self, id: VisualId) -> Option<&Visual> {
        self.visuals.get(&id)
    }

    /// Number of live visuals.
    pub fn len(&self) -> usize {
        self.visuals.len()
    }

    /// Whether no visual is live.
    pub fn is_empty(&self) -> bool {
        self.visuals.is_empty()
    }

    /// Live visuals of one kind.
    pub fn count_kind(&self, kind: VisualKind) -> usize {
        self.visuals.values().filter(|v| v.kind == kind).count()
    }

    /// Readable events: the previous frame's followed by the current one's.
    pub fn events(&self) -> impl Iterator<Item = &VisualEvent> {
        self.prev.iter().chain(self.current.iter())
    }

    /// Number of readable events.
    pub fn event_count(&self) -> usize {
        self.prev.len() + self.current.len()
    }

    /// Advances the frame: previous events are dropped, current becomes
    /// previous.
    pub fn swap(&mut self) {
        self.prev.clear();
        std::mem::swap(&mut self.prev, &mut self.current);
    }

    /// Clears both event buffers. Tallies are kept.
    pub fn clear_events(&mut self) {
        self.prev.clear();
        self.current.clear();
    }

    /// Running totals.
    pub fn tally(&self) -> EffectTally {
        self.tally
    }

    /// Number of fire effects played.
    pub fn fire_effects(&self) -> usize {
        self.tally.fire_effects
    }

    /// Number of hit effects played.
    pub fn hit_effects(&self) -> usize {
        self.tally.hit_effects
    }

    /// Number of visuals ever created of `kind`.
    pub fn spawned_of(&self, kind: VisualKind) -> usize {
        self.tally.spawned[kind as usize]
    }
}
