//! Per-tick player input and its wire message.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::clock::Tick;
use crate::replicated::PeerId;

/// One tick of a player's intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Fire button held.
    pub fire: bool,
    /// Aim direction. Zero keeps the weapon's previous aim.
    pub aim: Vec3,
    /// Remote tick the player was looking at when sampling this input; hit
    /// detection on the authority rewinds hitboxes to it.
    pub view_tick: f64,
}

impl PlayerInput {
    /// Fire button held, aiming along `aim`.
    pub fn firing(aim: Vec3) -> Self {
        Self {
            fire: true,
            aim,
            view_tick: 0.0,
        }
    }

    /// Button released, aiming along `aim`.
    pub fn idle(aim: Vec3) -> Self {
        Self {
            fire: false,
            aim,
            view_tick: 0.0,
        }
    }
}

/// Input sent from a client to the authority.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    /// Sending peer.
    pub peer: PeerId,
    /// Tick the input belongs to.
    pub tick: Tick,
    /// The input.
    pub input: PlayerInput,
}
