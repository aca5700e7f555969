//! Client-side prediction: buffered inputs for resimulation and the
//! reconciler that matches speculative spawns with authoritative ones.
//!
//! An input holder may spawn an object the moment its input fires, tagged
//! with a [`PredictionKey`]. The authority spawns the real object with the
//! same key. When the spawn arrives the [`SpawnReconciler`] confirms the
//! prediction and the local object is merged; when a snapshot for that tick
//! arrives without it, or the pending window elapses, it is rejected.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::Tick;
use crate::error::NetcodeError;
use crate::input::PlayerInput;
use crate::replicated::PeerId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default maximum number of entries in the input buffer (~2 s at 60 Hz).
pub const DEFAULT_BUFFER_SIZE: usize = 128;

// ---------------------------------------------------------------------------
// PredictionKey
// ---------------------------------------------------------------------------

/// Correlates a speculative spawn with its authoritative counterpart.
///
/// Only the low byte of the tick is kept, so keys repeat every 256 ticks;
/// pending predictions must resolve well within that window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PredictionKey {
    /// Low byte of the fire tick.
    pub tick_component: u8,
    /// Firing peer plus one, so peer 0 at tick 0 never yields an all-zero key.
    pub peer_component: u8,
}

impl PredictionKey {
    /// Key for a spawn fired by `peer` on `tick`.
    pub fn new(tick: Tick, peer: PeerId) -> Self {
        Self {
            tick_component: tick as u8,
            peer_component: peer.0.wrapping_add(1) as u8,
        }
    }
}

// ---------------------------------------------------------------------------
// SpawnReconciler
// ---------------------------------------------------------------------------

/// Pending speculative spawns, keyed by prediction key.
#[derive(Debug, Clone)]
pub struct SpawnReconciler {
    pending: FxHashMap<PredictionKey, Tick>,
    window: u64,
}

impl SpawnReconciler {
    /// Creates a reconciler that gives up on predictions older than
    /// `window` ticks.
    pub fn new(window: u32) -> Self {
        Self {
            pending: FxHashMap::default(),
            window: u64::from(window.clamp(1, 255)),
        }
    }

    /// Registers a prediction made on `tick`.
    pub fn register(&mut self, key: PredictionKey, tick: Tick) -> Result<(), NetcodeError> {
        if self.pending.contains_key(&key) {
            return Err(NetcodeError::PredictionKeyInUse(key));
        }
        trace!(?key, tick, "prediction registered");
        self.pending.insert(key, tick);
        Ok(())
    }

    /// Whether `key` awaits confirmation.
    pub fn is_pending(&self, key: &PredictionKey) -> bool {
        self.pending.contains_key(key)
    }

    /// The authority spawned the predicted object. Returns `false` if the key
    /// was not pending.
    pub fn confirm(&mut self, key: &PredictionKey) -> bool {
        let confirmed = self.pending.remove(key).is_some();
        if confirmed {
            debug!(?key, "predicted spawn confirmed");
        }
        confirmed
    }

    /// Drops a pending key without confirmation.
    pub fn reject(&mut self, key: &PredictionKey) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Rejects every prediction for a tick the authority has already
    /// confirmed without spawning it.
    pub fn resolve_unmatched(&mut self, confirmed_tick: Tick) -> Vec<PredictionKey> {
        self.drain_where(|tick| tick <= confirmed_tick)
    }

    /// Rejects predictions older than the pending window.
    pub fn expire(&mut self, now: Tick) -> Vec<PredictionKey> {
        let window = self.window;
        self.drain_where(|tick| now.saturating_sub(tick) > window)
    }

    /// Number of unresolved predictions.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn drain_where(&mut self, stale: impl Fn(Tick) -> bool) -> Vec<PredictionKey> {
        let mut keys: Vec<PredictionKey> = self
            .pending
            .iter()
            .filter(|&(_, &tick)| stale(tick))
            .map(|(&key, _)| key)
            .collect();
        keys.sort_unstable();
        for key in &keys {
            self.pending.remove(key);
        }
        keys
    }
}

// ---------------------------------------------------------------------------
// InputBuffer
// ---------------------------------------------------------------------------

/// A single buffered input and the tick it was applied on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEntry {
    /// Tick the input belongs to.
    pub tick: Tick,
    /// The input sent to the authority.
    pub input: PlayerInput,
}

/// Bounded buffer of [`InputEntry`] items in tick order.
///
/// Holds every input the authority has not confirmed yet so that
/// resimulation can replay them after a snapshot rolls state back.
#[derive(Debug, Clone)]
pub struct InputBuffer {
    entries: VecDeque<InputEntry>,
    max_size: usize,
}

impl InputBuffer {
    /// Creates a new buffer with the given maximum capacity.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Pushes a new entry, evicting the oldest if at capacity.
    pub fn push(&mut self, tick: Tick, input: PlayerInput) {
        if self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(InputEntry { tick, input });
    }

    /// Discards all entries with tick ≤ `tick` (the authority has them).
    pub fn discard_up_to(&mut self, tick: Tick) {
        while self.entries.front().is_some_and(|e| e.tick <= tick) {
            self.entries.pop_front();
        }
    }

    /// Entries with tick > `tick`.
    pub fn entries_after(&self, tick: Tick) -> impl Iterator<Item = &InputEntry> {
        self.entries.iter().filter(move |e| e.tick > tick)
    }

    /// The input recorded for exactly `tick`.
    pub fn input_at(&self, tick: Tick) -> Option<PlayerInput> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.tick == tick)
            .map(|e| e.input)
    }

    /// Returns the number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn test_key_components() {
        let key = PredictionKey::new(0x1234, PeerId(0));
        assert_eq!(key.tick_component, 0x34);
        assert_eq!(key.peer_component, 1);
        assert_ne!(key, PredictionKey::new(0x1234, PeerId(1)));
        assert_ne!(key, PredictionKey::new(0x1235, PeerId(0)));
    }

    #[test]
    fn test_key_repeats_after_256_ticks() {
        assert_eq!(
            PredictionKey::new(10, PeerId(3)),
            PredictionKey::new(266, PeerId(3))
        );
    }

    #[test]
    fn test_pending_key_cannot_be_reused() {
        let mut reconciler = SpawnReconciler::new(64);
        let key = PredictionKey::new(10, PeerId(1));
        reconciler.register(key, 10).unwrap();
        assert!(matches!(
            reconciler.register(key, 266),
            Err(NetcodeError::PredictionKeyInUse(k)) if k == key
        ));

        // Reusable once resolved.
        assert!(reconciler.confirm(&key));
        reconciler.register(key, 266).unwrap();
    }

    #[test]
    fn test_confirm_and_reject() {
        let mut reconciler = SpawnReconciler::new(64);
        let a = PredictionKey::new(1, PeerId(1));
        let b = PredictionKey::new(2, PeerId(1));
        reconciler.register(a, 1).unwrap();
        reconciler.register(b, 2).unwrap();

        assert!(reconciler.confirm(&a));
        assert!(!reconciler.confirm(&a));
        assert!(reconciler.reject(&b));
        assert_eq!(reconciler.pending_len(), 0);
    }

    #[test]
    fn test_unmatched_predictions_resolve_by_tick() {
        let mut reconciler = SpawnReconciler::new(64);
        for tick in [5u64, 6, 9] {
            reconciler.register(PredictionKey::new(tick, PeerId(1)), tick).unwrap();
        }
        let rejected = reconciler.resolve_unmatched(6);
        assert_eq!(
            rejected,
            vec![PredictionKey::new(5, PeerId(1)), PredictionKey::new(6, PeerId(1))]
        );
        assert!(reconciler.is_pending(&PredictionKey::new(9, PeerId(1))));
    }

    #[test]
    fn test_window_expiry() {
        let mut reconciler = SpawnReconciler::new(10);
        let key = PredictionKey::new(100, PeerId(2));
        reconciler.register(key, 100).unwrap();
        assert!(reconciler.expire(110).is_empty());
        assert_eq!(reconciler.expire(111), vec![key]);
    }

    #[test]
    fn test_buffer_size_is_bounded() {
        let mut buffer = InputBuffer::new(64);
        for tick in 0..100u64 {
            buffer.push(tick, PlayerInput::default());
        }
        assert_eq!(buffer.len(), 64);
        assert_eq!(buffer.entries_after(0).next().unwrap().tick, 36);
    }

    #[test]
    fn test_discard_and_replay_window() {
        let mut buffer = InputBuffer::default();
        for tick in 1..=10u64 {
            buffer.push(tick, PlayerInput::firing(Vec3::Z));
        }
        buffer.discard_up_to(6);
        let ticks: Vec<u64> = buffer.entries_after(7).map(|e| e.tick).collect();
        assert_eq!(ticks, vec![8, 9, 10]);
        assert_eq!(buffer.len(), 4);
        assert!(buffer.input_at(6).is_none());
        assert!(buffer.input_at(7).unwrap().fire);
    }
}
