pub mod clock;
pub mod delta;
pub mod input;
pub mod interp;
pub mod manager;
pub mod projectile;
pub mod protocol;
pub mod room;
pub mod state;

pub use clock::{ClockSync, TickClock};
pub use delta::{
    BulletUpdate, DeltaTracker, EnemyUpdate, GameStateDelta, GuestStateBuffer, PlayerDelta,
};
pub use input::{
    DEFAULT_INPUT_RING_CAPACITY, InputFlags, InputPacket, InputRing, PlayerInput,
};
pub use interp::{
    BulletPredictor, EntityInterpolator, EntitySample, JitterBuffer, LatencyEstimator,
};
pub use manager::{ConnectionState, NetConfig, NetSession};
pub use projectile::{ProjectileManager, ProjectileSpawn, ProjectileState};
pub use protocol::{
    DEFAULT_TICK_RATE, EventEnvelope, GameEvent, Message, PeerRole, WireError,
};
pub use room::{LinkConditions, LoopbackRoom, NetError, Room, RoomEvent};
pub use state::{
    BulletState, EnemyKind, EnemyState, GameStateSync, PlayerSlot, PlayerState,
};
