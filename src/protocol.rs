use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::delta::GameStateDelta;
use crate::input::InputPacket;
use crate::projectile::ProjectileSpawn;
use crate::state::PlayerSlot;

pub const DEFAULT_TICK_RATE: u32 = 60;

/// Local input is broadcast at most at this cadence (20 Hz).
pub const INPUT_SEND_INTERVAL_MS: f64 = 50.0;
/// State deltas leave the host at most at this cadence (5 Hz).
pub const SNAPSHOT_SEND_INTERVAL_MS: f64 = 200.0;
/// Clock-sync pings while connected.
pub const PING_INTERVAL_MS: f64 = 2000.0;
/// A full state sync is forced whenever the last one is older than this.
pub const FULL_SYNC_INTERVAL_MS: f64 = 3000.0;

/// Player/enemy movement below this displacement stays off the wire.
pub const POSITION_THRESHOLD: f32 = 2.0;
pub const ROTATION_THRESHOLD: f32 = 0.05;
/// Bullets are re-sent on trajectory change, not displacement.
pub const VELOCITY_THRESHOLD: f32 = 5.0;

/// Which side of the session a peer plays. The host is authoritative for the
/// shared game state; both peers are authoritative for their own inputs and
/// projectiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum PeerRole {
    Host,
    Guest,
}

impl PeerRole {
    pub fn other(self) -> Self {
        match self {
            PeerRole::Host => PeerRole::Guest,
            PeerRole::Guest => PeerRole::Host,
        }
    }

    pub fn is_host(self) -> bool {
        matches!(self, PeerRole::Host)
    }
}

/// Closed set of gameplay events carried over the `game-event` channel.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum GameEvent {
    PlayerHit { target: PlayerSlot, damage: f32 },
    PlayerDied { player: PlayerSlot },
    EnemyKilled { id: u32, by: PlayerSlot },
    WaveCleared { wave: u32 },
    UpgradeChosen { player: PlayerSlot, upgrade: u8 },
    DashUsed { player: PlayerSlot },
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EventEnvelope {
    pub tick: u64,
    pub event: GameEvent,
}

/// One wire message per transport action. The transport is a room-scoped
/// pub/sub black box with at-least-once, unordered delivery; ordering and
/// idempotence are built on top (seq numbers for state, tick tags for input).
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Message {
    Input(InputPacket),
    ProjectileSpawn(ProjectileSpawn),
    Event(EventEnvelope),
    Snapshot(GameStateDelta),
    Ping { t: f64 },
    Pong { t: f64, st: f64 },
    GameStart,
}

impl Message {
    /// Name of the pub/sub action this message travels on.
    pub fn channel(&self) -> &'static str {
        match self {
            Message::Input(_) => "input",
            Message::ProjectileSpawn(_) => "projectile-spawn",
            Message::Event(_) => "game-event",
            Message::Snapshot(_) => "state-snapshot",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::GameStart => "game-start",
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, WireError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(WireError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WireError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(WireError::Deserialize)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrip() {
        let msg = Message::Pong { t: 1000.0, st: 1520.5 };
        let bytes = msg.serialize().unwrap();
        let back = Message::deserialize(&bytes).unwrap();

        match back {
            Message::Pong { t, st } => {
                assert_eq!(t, 1000.0);
                assert_eq!(st, 1520.5);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn channel_names() {
        assert_eq!(Message::GameStart.channel(), "game-start");
        assert_eq!(Message::Ping { t: 0.0 }.channel(), "ping");
        assert_eq!(
            Message::Event(EventEnvelope {
                tick: 1,
                event: GameEvent::WaveCleared { wave: 3 },
            })
            .channel(),
            "game-event"
        );
    }

    #[test]
    fn garbage_bytes_rejected() {
        assert!(Message::deserialize(&[0x13, 0x37]).is_err());
    }
}
