//! Projectile replication: a fixed-tick authority, predicting clients, and
//! four interchangeable ways of putting a weapon's shots on the wire.

pub mod behaviour;
pub mod client;
pub mod clock;
pub mod error;
pub mod input;
pub mod kinematic;
pub mod lag_compensation;
pub mod peer;
pub mod prediction;
pub mod props;
pub mod replicated;
pub mod replication;
pub mod scene;
pub mod server;
pub mod session;
pub mod strategies;
pub mod timer;
pub mod visuals;
pub mod weapon;

pub use behaviour::{
    Commands, Launch, NetworkBehaviour, ObjectKey, ObjectKind, PoolSlot, RenderContext,
    SimContext, SimStage, SpawnRequest, StrategyKind, Tuning,
};
pub use client::ClientPeer;
pub use clock::{DEFAULT_TICK_RATE, RenderTime, Tick, TickClock, TickSchedule, ticks_for};
pub use error::NetcodeError;
pub use input::{InputMessage, PlayerInput};
pub use kinematic::{FireRecord, ProjectilePhase};
pub use lag_compensation::{
    ImpulseGate, LagCompensation, PendingImpulse, ResolveParams, ShotFilter, StepOutcome,
    advance_record,
};
pub use peer::{PeerCore, PeerStats};
pub use prediction::{InputBuffer, PredictionKey, SpawnReconciler};
pub use props::{PropBody, PropState};
pub use replicated::{ChangeDetector, FireCountWatcher, ObjectAuthority, PeerId, Replicated};
pub use replication::{BandwidthStats, NetworkId, ReplicationServer, Snapshot};
pub use scene::{Scene, SceneWorld};
pub use server::ServerPeer;
pub use session::{InputScript, LoopbackSession, fire_every, fire_on, idle};
pub use timer::TickTimer;
pub use visuals::{EffectTally, VisualEvent, VisualKind, VisualLayer};
pub use weapon::WeaponController;
