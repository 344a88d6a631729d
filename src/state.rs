use rkyv::{Archive, Deserialize, Serialize};

pub const DEFAULT_PLAYER_HEALTH: f32 = 100.0;

/// Which player record an event or delta field refers to. By convention the
/// host controls P1 and the guest controls P2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum PlayerSlot {
    P1,
    P2,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerState {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub health: f32,
    pub active: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            health: DEFAULT_PLAYER_HEALTH,
            active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum EnemyKind {
    #[default]
    Drifter,
    Charger,
    Weaver,
    Hulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize)]
#[rkyv(derive(Debug))]
pub struct EnemyState {
    pub id: u32,
    pub kind: EnemyKind,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub health: f32,
    pub active: bool,
}

impl EnemyState {
    pub fn new(id: u32, kind: EnemyKind) -> Self {
        Self {
            id,
            kind,
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            health: DEFAULT_PLAYER_HEALTH,
            active: true,
        }
    }
}

/// Enemy bullet or player bullet; fast movers replicated by trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize)]
#[rkyv(derive(Debug))]
pub struct BulletState {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

/// Host-authoritative root snapshot: the unit of replication.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize)]
#[rkyv(derive(Debug))]
pub struct GameStateSync {
    pub p1: PlayerState,
    pub p2: PlayerState,
    pub enemies: Vec<EnemyState>,
    pub bullets: Vec<BulletState>,
    pub player_bullets: Vec<BulletState>,
    pub wave: u32,
    pub score: u32,
    pub intermission_active: bool,
    pub countdown: f32,
    pub pending_wave: u32,
    pub timestamp: f64,
}

impl GameStateSync {
    pub fn player(&self, slot: PlayerSlot) -> &PlayerState {
        match slot {
            PlayerSlot::P1 => &self.p1,
            PlayerSlot::P2 => &self.p2,
        }
    }

    pub fn player_mut(&mut self, slot: PlayerSlot) -> &mut PlayerState {
        match slot {
            PlayerSlot::P1 => &mut self.p1,
            PlayerSlot::P2 => &mut self.p2,
        }
    }
}

/// Replicated entity categories. Together with the per-category numeric id
/// this forms the composite identity used for delta bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Enemy,
    Bullet,
    PlayerBullet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: u32,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: u32) -> Self {
        Self { kind, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn entity_keys_distinguish_categories() {
        let mut map: HashMap<EntityKey, &str> = HashMap::new();
        map.insert(EntityKey::new(EntityKind::Enemy, 1), "enemy");
        map.insert(EntityKey::new(EntityKind::Bullet, 1), "bullet");
        map.insert(EntityKey::new(EntityKind::PlayerBullet, 1), "player bullet");

        assert_eq!(map.len(), 3);
        assert_eq!(map[&EntityKey::new(EntityKind::Bullet, 1)], "bullet");
    }

    #[test]
    fn player_defaults() {
        let player = PlayerState::default();
        assert_eq!(player.health, 100.0);
        assert!(player.active);
    }

    #[test]
    fn player_slot_lookup() {
        let mut state = GameStateSync::default();
        state.player_mut(PlayerSlot::P2).x = 42.0;

        assert_eq!(state.player(PlayerSlot::P2).x, 42.0);
        assert_eq!(state.player(PlayerSlot::P1).x, 0.0);
    }
}
