//! Replicated scene props.
//!
//! Every peer builds the scene's pushable bodies itself, but only the
//! authority applies hit impulses to them. A [`PropBody`] carries the
//! authoritative motion of one such body; clients re-pose their copy after
//! each snapshot, extrapolated to their own tick.

use std::any::Any;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::trace;
use volley_physics::{BodyId, BodyMotion};

use crate::behaviour::{NetworkBehaviour, ObjectKind, SimContext, Tuning};
use crate::clock::Tick;
use crate::error::NetcodeError;
use crate::lag_compensation::LagCompensation;
use crate::replicated::Replicated;
use crate::replication::{decode, encode};

/// Motion of a prop body at the start of the tick it was written on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PropState {
    /// Scene body id, identical on every peer.
    pub body: u32,
    /// Body center.
    pub position: Vec3,
    /// Linear velocity.
    pub velocity: Vec3,
}

/// Mirrors one scene body across peers.
#[derive(Debug, Clone)]
pub struct PropBody {
    state: Replicated<PropState>,
}

impl PropBody {
    /// Empty prop awaiting replicated state.
    pub fn blank() -> Self {
        Self {
            state: Replicated::new(PropState::default()),
        }
    }

    /// A prop tracking `body`, currently at `motion`.
    pub fn tracking(body: BodyId, motion: BodyMotion) -> Self {
        let mut prop = Self::blank();
        prop.state.overwrite(PropState {
            body: body.0,
            position: motion.position,
            velocity: motion.velocity,
        });
        prop
    }

    /// Current replicated state.
    pub fn state(&self) -> &PropState {
        self.state.get()
    }

    /// The tracked body.
    pub fn body(&self) -> BodyId {
        BodyId(self.state.get().body)
    }
}

impl NetworkBehaviour for PropBody {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Prop
    }

    fn fixed_update(&mut self, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        if !ctx.authority.has_state_authority() {
            return Ok(());
        }
        let Some(motion) = ctx.world.body_motion(self.body()) else {
            return Ok(());
        };
        let current = *self.state.get();
        if current.position != motion.position || current.velocity != motion.velocity {
            self.state.set(
                &ctx.authority,
                "prop_state",
                PropState {
                    position: motion.position,
                    velocity: motion.velocity,
                    ..current
                },
            )?;
        }
        Ok(())
    }

    fn sync_world(
        &mut self,
        confirmed: Tick,
        now: Tick,
        tuning: &Tuning,
        world: &mut dyn LagCompensation,
    ) {
        let state = *self.state.get();
        // The state was read before the authority stepped `confirmed`, and
        // this peer has already stepped `now`.
        let ticks = now.saturating_sub(confirmed) + 1;
        let position = state.position + state.velocity * (ticks as f32 * tuning.delta_time());
        if world.set_body_motion(
            self.body(),
            BodyMotion {
                position,
                velocity: state.velocity,
            },
        ) {
            trace!(body = state.body, confirmed, now, "prop re-posed");
        }
    }

    fn write_state(&self) -> Result<Vec<u8>, NetcodeError> {
        encode("prop", self.state.get())
    }

    fn read_state(&mut self, bytes: &[u8], _tick: Tick) -> Result<(), NetcodeError> {
        let state: PropState = decode("prop", bytes)?;
        self.state.overwrite(state);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
