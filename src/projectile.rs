use std::collections::HashMap;

use rkyv::{Archive, Deserialize, Serialize};

use crate::protocol::PeerRole;

/// Fire-and-forget spawn record broadcast by the owning peer. Ids are
/// owner-local monotonic counters, so `(owner, id)` is the true identity;
/// ids from different owners may collide numerically.
#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ProjectileSpawn {
    pub id: u32,
    pub tick: u64,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub owner: PeerRole,
    pub seed: u32,
}

/// Live projectile: the spawn record plus the integrated position.
#[derive(Debug, Clone)]
pub struct ProjectileState {
    pub spawn: ProjectileSpawn,
    pub x: f32,
    pub y: f32,
    pub active: bool,
}

impl ProjectileState {
    fn at_spawn(spawn: ProjectileSpawn) -> Self {
        Self {
            x: spawn.x,
            y: spawn.y,
            spawn,
            active: true,
        }
    }
}

/// Deterministic, fire-and-forget projectile simulation. The spawning peer
/// is authoritative; remote spawns are forward-simulated to the current tick
/// so they appear mid-flight instead of snapping in at their origin.
/// Collision, lifetime, and bounds belong to the gameplay layer.
#[derive(Debug)]
pub struct ProjectileManager {
    local_role: PeerRole,
    tick_rate: u32,
    next_id: u32,
    projectiles: HashMap<(PeerRole, u32), ProjectileState>,
}

impl ProjectileManager {
    pub fn new(local_role: PeerRole, tick_rate: u32) -> Self {
        Self {
            local_role,
            tick_rate,
            next_id: 0,
            projectiles: HashMap::new(),
        }
    }

    pub fn local_role(&self) -> PeerRole {
        self.local_role
    }

    /// Record an authoritative local spawn and return the record for the
    /// session layer to broadcast (this component does not send).
    pub fn spawn_local(&mut self, x: f32, y: f32, vx: f32, vy: f32, tick: u64, seed: u32) -> ProjectileSpawn {
        let id = self.next_id;
        self.next_id += 1;

        let spawn = ProjectileSpawn {
            id,
            tick,
            x,
            y,
            vx,
            vy,
            owner: self.local_role,
            seed,
        };
        self.projectiles
            .insert((spawn.owner, id), ProjectileState::at_spawn(spawn));
        spawn
    }

    /// Insert a remotely owned projectile, forward-integrated by the ticks
    /// elapsed since its spawn. Re-delivery of the same spawn record lands
    /// on the same `(owner, id)` slot, so duplicates do not double-insert.
    pub fn spawn_remote(&mut self, spawn: ProjectileSpawn, current_tick: u64) {
        let elapsed_ticks = current_tick.saturating_sub(spawn.tick);
        let elapsed = elapsed_ticks as f32 / self.tick_rate as f32;

        let mut state = ProjectileState::at_spawn(spawn);
        state.x += spawn.vx * elapsed;
        state.y += spawn.vy * elapsed;

        self.projectiles.insert((spawn.owner, spawn.id), state);
    }

    /// Integrate every active projectile by `velocity * dt` seconds.
    pub fn update(&mut self, dt: f32) {
        for state in self.projectiles.values_mut() {
            if !state.active {
                continue;
            }
            state.x += state.spawn.vx * dt;
            state.y += state.spawn.vy * dt;
        }
    }

    pub fn get(&self, owner: PeerRole, id: u32) -> Option<&ProjectileState> {
        self.projectiles.get(&(owner, id))
    }

    pub fn remove(&mut self, owner: PeerRole, id: u32) -> Option<ProjectileState> {
        self.projectiles.remove(&(owner, id))
    }

    pub fn clear(&mut self) {
        self.projectiles.clear();
        self.next_id = 0;
    }

    /// Whether this peer is authoritative for the projectile. The gameplay
    /// layer applies a hit only on the non-owning side, avoiding
    /// double-resolution in the two-authority model.
    pub fn is_owned(&self, owner: PeerRole) -> bool {
        owner == self.local_role
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectileState> {
        self.projectiles.values()
    }

    pub fn len(&self) -> usize {
        self.projectiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectiles.is_empty()
    }
}
