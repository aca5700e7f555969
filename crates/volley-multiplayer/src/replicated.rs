//! Replicated state with runtime-checked write access, plus the edge
//! detectors observers use instead of change callbacks.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::NetcodeError;

/// Identifies a connected peer. The authoritative server is [`PeerId::SERVER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    /// The authoritative peer.
    pub const SERVER: PeerId = PeerId(0);
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Roles the local peer holds for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAuthority {
    /// The peer evaluating these roles.
    pub local_peer: PeerId,
    /// Whether the local peer owns the object's replicated state.
    pub state_authority: bool,
    /// The peer whose input drives the object, if any.
    pub input_authority: Option<PeerId>,
    /// The object was created speculatively and awaits confirmation.
    pub predicted_spawn: bool,
}

impl ObjectAuthority {
    /// Roles of the authoritative peer for an object driven by `input`.
    pub fn server(input: Option<PeerId>) -> Self {
        Self {
            local_peer: PeerId::SERVER,
            state_authority: true,
            input_authority: input,
            predicted_spawn: false,
        }
    }

    /// Roles of a client for a confirmed object driven by `input`.
    pub fn client(local_peer: PeerId, input: Option<PeerId>) -> Self {
        Self {
            local_peer,
            state_authority: false,
            input_authority: input,
            predicted_spawn: false,
        }
    }

    /// Roles of a client for its own speculative spawn.
    pub fn predicted(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            state_authority: false,
            input_authority: Some(local_peer),
            predicted_spawn: true,
        }
    }

    /// Whether the local peer owns the replicated state.
    pub fn has_state_authority(&self) -> bool {
        self.state_authority
    }

    /// Whether the local peer's input drives this object.
    pub fn has_input_authority(&self) -> bool {
        self.input_authority == Some(self.local_peer)
    }

    /// A proxy only mirrors state. Predicted spawns count as input-owned.
    pub fn is_proxy(&self) -> bool {
        !(self.state_authority || self.predicted_spawn || self.has_input_authority())
    }

    /// State authority writes; the input holder writes speculatively and is
    /// corrected by the next confirmed snapshot.
    pub fn can_write(&self) -> bool {
        !self.is_proxy()
    }
}

/// A replicated field: readable everywhere, writable only by peers that
/// [`can_write`](ObjectAuthority::can_write).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Replicated<T> {
    value: T,
}

impl<T> Replicated<T> {
    /// Wraps an initial value.
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// Current value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Replaces the value after checking write access.
    pub fn set(
        &mut self,
        authority: &ObjectAuthority,
        field: &'static str,
        value: T,
    ) -> Result<(), NetcodeError> {
        Self::check(authority, field)?;
        self.value = value;
        Ok(())
    }

    /// Mutates the value in place after checking write access.
    pub fn modify<R>(
        &mut self,
        authority: &ObjectAuthority,
        field: &'static str,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, NetcodeError> {
        Self::check(authority, field)?;
        Ok(f(&mut self.value))
    }

    /// Applies authoritative state received from the network, bypassing the
    /// role check.
    pub fn overwrite(&mut self, value: T) {
        self.value = value;
    }

    fn check(authority: &ObjectAuthority, field: &'static str) -> Result<(), NetcodeError> {
        if authority.can_write() {
            Ok(())
        } else {
            trace!(peer = %authority.local_peer, field, "rejected replicated write");
            Err(NetcodeError::ReadOnly {
                peer: authority.local_peer,
                field,
            })
        }
    }
}

/// Edge detector over a locally observed value.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector<T> {
    last: Option<T>,
}

impl<T: Clone + PartialEq> ChangeDetector<T> {
    /// Creates a detector that treats the first observation as a change.
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Marks `value` as already seen.
    pub fn prime(&mut self, value: T) {
        self.last = Some(value);
    }

    /// Records `value` and reports whether it differs from the previous
    /// observation.
    pub fn changed(&mut self, value: &T) -> bool {
        if self.last.as_ref() == Some(value) {
            return false;
        }
        self.last = Some(value.clone());
        true
    }
}

/// Tracks how many fire events this peer has already shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireCountWatcher {
    visible: u32,
}

impl FireCountWatcher {
    /// Treats every fire up to `count` as already shown.
    pub fn prime(&mut self, count: u32) {
        self.visible = count;
    }

    /// Returns the fire indices not shown yet and marks them shown.
    ///
    /// A counter that moved backwards (a speculative fire rolled back) yields
    /// nothing and resets the watermark.
    pub fn observe(&mut self, count: u32) -> Range<u32> {
        let fresh = if count > self.visible {
            self.visible..count
        } else {
            count..count
        };
        self.visible = count;
        fresh
    }

    /// Fires shown so far.
    pub fn visible(&self) -> u32 {
        self.visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOOTER: PeerId = PeerId(1);
    const OBSERVER: PeerId = PeerId(2);

    #[test]
    fn test_proxy_cannot_write() {
        let proxy = ObjectAuthority::client(OBSERVER, Some(SHOOTER));
        assert!(proxy.is_proxy());

        let mut count = Replicated::new(3u32);
        let err = count.set(&proxy, "fire_count", 4).unwrap_err();
        assert!(matches!(err, NetcodeError::ReadOnly { peer, .. } if peer == OBSERVER));
        assert_eq!(*count.get(), 3);

        count.overwrite(9);
        assert_eq!(*count.get(), 9);
    }

    #[test]
    fn test_roles_that_may_write() {
        let mut value = Replicated::new(0u32);
        let server = ObjectAuthority::server(Some(SHOOTER));
        let input = ObjectAuthority::client(SHOOTER, Some(SHOOTER));
        let predicted = ObjectAuthority::predicted(SHOOTER);

        for authority in [server, input, predicted] {
            assert!(!authority.is_proxy());
            value.modify(&authority, "value", |v| *v += 1).unwrap();
        }
        assert_eq!(*value.get(), 3);
    }

    #[test]
    fn test_change_detector_is_edge_triggered() {
        let mut detector = ChangeDetector::new();
        detector.prime(false);
        assert!(!detector.changed(&false));
        assert!(detector.changed(&true));
        assert!(!detector.changed(&true));
        assert!(!detector.changed(&true));
    }

    #[test]
    fn test_watcher_reports_each_fire_once() {
        let mut watcher = FireCountWatcher::default();
        watcher.prime(7);
        assert!(watcher.observe(7).is_empty());
        assert_eq!(watcher.observe(10), 7..10);
        assert!(watcher.observe(10).is_empty());
    }

    #[test]
    fn test_watcher_handles_rollback() {
        let mut watcher = FireCountWatcher::default();
        assert_eq!(watcher.observe(2), 0..2);
        assert!(watcher.observe(1).is_empty());
        assert_eq!(watcher.visible(), 1);
        assert_eq!(watcher.observe(2), 1..2);
    }

    #[test]
    fn test_replicated_serializes_transparently() {
        let value = Replicated::new(5u32);
        assert_eq!(serde_json::to_string(&value).unwrap(), "5");
    }
}
