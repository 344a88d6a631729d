use std::collections::{HashMap, HashSet};

use rkyv::{Archive, Deserialize, Serialize};

use crate::interp::shortest_angle;
use crate::protocol::{
    FULL_SYNC_INTERVAL_MS, POSITION_THRESHOLD, ROTATION_THRESHOLD, VELOCITY_THRESHOLD,
};
use crate::state::{
    BulletState, EnemyKind, EnemyState, EntityKey, EntityKind, GameStateSync, PlayerState,
};

/// Partial player record; only changed fields are present. Position is
/// always sent as a pair.
#[derive(Debug, Clone, Copy, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerDelta {
    pub pos: Option<[f32; 2]>,
    pub rotation: Option<f32>,
    pub health: Option<f32>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EnemyUpdate {
    pub id: u32,
    pub kind: Option<EnemyKind>,
    pub pos: Option<[f32; 2]>,
    pub vel: Option<[f32; 2]>,
    pub health: Option<f32>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct BulletUpdate {
    pub id: u32,
    pub pos: Option<[f32; 2]>,
    pub vel: Option<[f32; 2]>,
}

/// Wire message for state replication. A full delta (`is_full`) carries
/// complete per-category arrays and every scalar unconditionally; a partial
/// delta carries only fields that crossed their change thresholds since the
/// last *sent* values.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct GameStateDelta {
    pub seq: u64,
    pub base_seq: u64,
    pub timestamp: f64,
    pub is_full: bool,
    pub p1: Option<PlayerDelta>,
    pub p2: Option<PlayerDelta>,
    pub enemy_updates: Vec<EnemyUpdate>,
    pub enemy_removals: Vec<u32>,
    pub bullet_updates: Vec<BulletUpdate>,
    pub bullet_removals: Vec<u32>,
    pub player_bullet_updates: Vec<BulletUpdate>,
    pub player_bullet_removals: Vec<u32>,
    pub wave: Option<u32>,
    pub score: Option<u32>,
    pub intermission_active: Option<bool>,
    pub countdown: Option<f32>,
    pub pending_wave: Option<u32>,
}

impl GameStateDelta {
    fn empty(seq: u64, timestamp: f64, is_full: bool) -> Self {
        Self {
            seq,
            base_seq: seq.saturating_sub(1),
            timestamp,
            is_full,
            p1: None,
            p2: None,
            enemy_updates: Vec::new(),
            enemy_removals: Vec::new(),
            bullet_updates: Vec::new(),
            bullet_removals: Vec::new(),
            player_bullet_updates: Vec::new(),
            player_bullet_removals: Vec::new(),
            wave: None,
            score: None,
            intermission_active: None,
            countdown: None,
            pending_wave: None,
        }
    }
}

/// Last values actually put on the wire for one entity. Thresholds compare
/// against these, not the live state, so sub-threshold drift accumulates
/// until it finally crosses the gate or a full sync re-baselines everything.
#[derive(Debug, Clone, Copy)]
struct SentEntity {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    health: f32,
    active: bool,
}

impl SentEntity {
    fn of_enemy(enemy: &EnemyState) -> Self {
        Self {
            x: enemy.x,
            y: enemy.y,
            vx: enemy.vx,
            vy: enemy.vy,
            health: enemy.health,
            active: enemy.active,
        }
    }

    fn of_bullet(bullet: &BulletState) -> Self {
        Self {
            x: bullet.x,
            y: bullet.y,
            vx: bullet.vx,
            vy: bullet.vy,
            health: 0.0,
            active: true,
        }
    }
}

/// Host-side delta generator. Snapshots the authoritative state, emits
/// minimal diffs against the last-sent values, and forces a periodic full
/// sync to bound guest staleness.
#[derive(Debug)]
pub struct DeltaTracker {
    seq: u64,
    last_full_sync_ms: f64,
    full_sync_interval_ms: f64,
    previous: Option<GameStateSync>,
    sent: HashMap<EntityKey, SentEntity>,
    sent_p1: PlayerState,
    sent_p2: PlayerState,
}

impl Default for DeltaTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::with_interval(FULL_SYNC_INTERVAL_MS)
    }

    pub fn with_interval(full_sync_interval_ms: f64) -> Self {
        Self {
            seq: 0,
            last_full_sync_ms: f64::NEG_INFINITY,
            full_sync_interval_ms,
            previous: None,
            sent: HashMap::new(),
            sent_p1: PlayerState::default(),
            sent_p2: PlayerState::default(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn generate(
        &mut self,
        state: &GameStateSync,
        now_ms: f64,
        force_full: bool,
    ) -> GameStateDelta {
        self.seq += 1;

        let need_full = force_full
            || self.previous.is_none()
            || now_ms - self.last_full_sync_ms > self.full_sync_interval_ms;

        if need_full {
            self.full_sync(state, now_ms)
        } else {
            self.partial_sync(state, now_ms)
        }
    }

    fn full_sync(&mut self, state: &GameStateSync, now_ms: f64) -> GameStateDelta {
        self.last_full_sync_ms = now_ms;

        self.sent.clear();
        for enemy in &state.enemies {
            self.sent.insert(
                EntityKey::new(EntityKind::Enemy, enemy.id),
                SentEntity::of_enemy(enemy),
            );
        }
        for bullet in &state.bullets {
            self.sent.insert(
                EntityKey::new(EntityKind::Bullet, bullet.id),
                SentEntity::of_bullet(bullet),
            );
        }
        for bullet in &state.player_bullets {
            self.sent.insert(
                EntityKey::new(EntityKind::PlayerBullet, bullet.id),
                SentEntity::of_bullet(bullet),
            );
        }
        self.sent_p1 = state.p1;
        self.sent_p2 = state.p2;
        self.previous = Some(state.clone());

        let mut delta = GameStateDelta::empty(self.seq, now_ms, true);
        delta.p1 = Some(full_player(&state.p1));
        delta.p2 = Some(full_player(&state.p2));
        delta.enemy_updates = state.enemies.iter().map(full_enemy).collect();
        delta.bullet_updates = state.bullets.iter().map(full_bullet).collect();
        delta.player_bullet_updates = state.player_bullets.iter().map(full_bullet).collect();
        delta.wave = Some(state.wave);
        delta.score = Some(state.score);
        delta.intermission_active = Some(state.intermission_active);
        delta.countdown = Some(state.countdown);
        delta.pending_wave = Some(state.pending_wave);
        delta
    }

    fn partial_sync(&mut self, state: &GameStateSync, now_ms: f64) -> GameStateDelta {
        // The baseline is replaced wholesale below; taking it avoids holding
        // a borrow across the per-entity bookkeeping.
        let Some(prev) = self.previous.take() else {
            return self.full_sync(state, now_ms);
        };

        let mut delta = GameStateDelta::empty(self.seq, now_ms, false);
        delta.p1 = diff_player(&mut self.sent_p1, &state.p1);
        delta.p2 = diff_player(&mut self.sent_p2, &state.p2);

        self.diff_enemies(state, &mut delta);
        self.diff_bullets(
            EntityKind::Bullet,
            &state.bullets,
            &mut delta.bullet_updates,
            &mut delta.bullet_removals,
        );
        self.diff_bullets(
            EntityKind::PlayerBullet,
            &state.player_bullets,
            &mut delta.player_bullet_updates,
            &mut delta.player_bullet_removals,
        );

        if state.wave != prev.wave {
            delta.wave = Some(state.wave);
        }
        if state.score != prev.score {
            delta.score = Some(state.score);
        }
        if state.intermission_active != prev.intermission_active {
            delta.intermission_active = Some(state.intermission_active);
        }
        if state.countdown != prev.countdown {
            delta.countdown = Some(state.countdown);
        }
        if state.pending_wave != prev.pending_wave {
            delta.pending_wave = Some(state.pending_wave);
        }

        self.previous = Some(state.clone());
        delta
    }

    fn diff_enemies(&mut self, state: &GameStateSync, delta: &mut GameStateDelta) {
        let mut live: HashSet<u32> = HashSet::with_capacity(state.enemies.len());

        for enemy in &state.enemies {
            live.insert(enemy.id);
            let key = EntityKey::new(EntityKind::Enemy, enemy.id);

            let Some(sent) = self.sent.get_mut(&key) else {
                // New id: send the full record.
                self.sent.insert(key, SentEntity::of_enemy(enemy));
                delta.enemy_updates.push(full_enemy(enemy));
                continue;
            };

            let moved = dist_sq(enemy.x - sent.x, enemy.y - sent.y)
                > POSITION_THRESHOLD * POSITION_THRESHOLD;
            let health_changed = enemy.health != sent.health;
            let active_changed = enemy.active != sent.active;

            if !(moved || health_changed || active_changed) {
                continue;
            }

            let mut update = EnemyUpdate {
                id: enemy.id,
                kind: None,
                pos: None,
                vel: None,
                health: None,
                active: None,
            };
            if moved {
                update.pos = Some([enemy.x, enemy.y]);
                update.vel = Some([enemy.vx, enemy.vy]);
                sent.x = enemy.x;
                sent.y = enemy.y;
                sent.vx = enemy.vx;
                sent.vy = enemy.vy;
            }
            if health_changed {
                update.health = Some(enemy.health);
                sent.health = enemy.health;
            }
            if active_changed {
                update.active = Some(enemy.active);
                sent.active = enemy.active;
            }
            delta.enemy_updates.push(update);
        }

        self.collect_removals(EntityKind::Enemy, &live, &mut delta.enemy_removals);
    }

    fn diff_bullets(
        &mut self,
        kind: EntityKind,
        bullets: &[BulletState],
        updates: &mut Vec<BulletUpdate>,
        removals: &mut Vec<u32>,
    ) {
        let mut live: HashSet<u32> = HashSet::with_capacity(bullets.len());

        for bullet in bullets {
            live.insert(bullet.id);
            let key = EntityKey::new(kind, bullet.id);

            let Some(sent) = self.sent.get_mut(&key) else {
                self.sent.insert(key, SentEntity::of_bullet(bullet));
                updates.push(full_bullet(bullet));
                continue;
            };

            // Trajectory change, not displacement: fast movers always beat a
            // position threshold, so gate on velocity instead.
            let turned = dist_sq(bullet.vx - sent.vx, bullet.vy - sent.vy)
                > VELOCITY_THRESHOLD * VELOCITY_THRESHOLD;
            if !turned {
                continue;
            }

            updates.push(full_bullet(bullet));
            *sent = SentEntity::of_bullet(bullet);
        }

        self.collect_removals(kind, &live, removals);
    }

    fn collect_removals(&mut self, kind: EntityKind, live: &HashSet<u32>, removals: &mut Vec<u32>) {
        let stale: Vec<EntityKey> = self
            .sent
            .keys()
            .filter(|key| key.kind == kind && !live.contains(&key.id))
            .copied()
            .collect();

        for key in stale {
            self.sent.remove(&key);
            removals.push(key.id);
        }
    }

    pub fn reset(&mut self) {
        self.seq = 0;
        self.last_full_sync_ms = f64::NEG_INFINITY;
        self.previous = None;
        self.sent.clear();
        self.sent_p1 = PlayerState::default();
        self.sent_p2 = PlayerState::default();
    }
}

fn dist_sq(dx: f32, dy: f32) -> f32 {
    dx * dx + dy * dy
}

fn full_player(player: &PlayerState) -> PlayerDelta {
    PlayerDelta {
        pos: Some([player.x, player.y]),
        rotation: Some(player.rotation),
        health: Some(player.health),
        active: Some(player.active),
    }
}

fn full_enemy(enemy: &EnemyState) -> EnemyUpdate {
    EnemyUpdate {
        id: enemy.id,
        kind: Some(enemy.kind),
        pos: Some([enemy.x, enemy.y]),
        vel: Some([enemy.vx, enemy.vy]),
        health: Some(enemy.health),
        active: Some(enemy.active),
    }
}

fn full_bullet(bullet: &BulletState) -> BulletUpdate {
    BulletUpdate {
        id: bullet.id,
        pos: Some([bullet.x, bullet.y]),
        vel: Some([bullet.vx, bullet.vy]),
    }
}

/// Diff a player against the last values put on the wire for them. Like the
/// entity path, only emitted fields re-baseline `sent`, so sub-threshold
/// drift keeps accumulating until it finally crosses the gate.
fn diff_player(sent: &mut PlayerState, curr: &PlayerState) -> Option<PlayerDelta> {
    let moved =
        dist_sq(curr.x - sent.x, curr.y - sent.y) > POSITION_THRESHOLD * POSITION_THRESHOLD;
    let rotated = shortest_angle(curr.rotation - sent.rotation).abs() > ROTATION_THRESHOLD;
    let health_changed = curr.health != sent.health;
    let active_changed = curr.active != sent.active;

    if !(moved || rotated || health_changed || active_changed) {
        return None;
    }

    if moved {
        sent.x = curr.x;
        sent.y = curr.y;
    }
    if rotated {
        sent.rotation = curr.rotation;
    }
    if health_changed {
        sent.health = curr.health;
    }
    if active_changed {
        sent.active = curr.active;
    }

    Some(PlayerDelta {
        pos: moved.then(|| [curr.x, curr.y]),
        rotation: rotated.then_some(curr.rotation),
        health: health_changed.then_some(curr.health),
        active: active_changed.then_some(curr.active),
    })
}

/// Deltas older than one full-sync interval are superseded anyway, so the
/// hold buffer never needs more than a couple of snapshot intervals' worth.
const MAX_PENDING_DELTAS: usize = 32;

/// Guest-side reconstruction buffer. Applies deltas strictly in sequence,
/// holds out-of-order arrivals, and lets a full sync supersede everything.
/// Gaps are never guessed at; staleness is healed by the next full sync.
#[derive(Debug, Default)]
pub struct GuestStateBuffer {
    last_seq: u64,
    state: Option<GameStateSync>,
    last_full: Option<GameStateSync>,
    pending: Vec<GameStateDelta>,
}

impl GuestStateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn state(&self) -> Option<&GameStateSync> {
        self.state.as_ref()
    }

    pub fn last_full_state(&self) -> Option<&GameStateSync> {
        self.last_full.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Fold one delta into the reconstruction. Returns the current state,
    /// unchanged for stale/duplicate/gapped deltas, `None` until the first
    /// full sync arrives.
    pub fn apply(&mut self, delta: GameStateDelta) -> Option<&GameStateSync> {
        if delta.is_full {
            // A full sync supersedes any partial reconstruction in flight,
            // regardless of ordering.
            let state = build_full_state(&delta);
            self.last_seq = delta.seq;
            self.last_full = Some(state.clone());
            self.state = Some(state);
            self.pending.clear();
            return self.state.as_ref();
        }

        if delta.seq <= self.last_seq {
            log::trace!("discarding stale delta seq={} (at {})", delta.seq, self.last_seq);
            return self.state.as_ref();
        }

        if self.state.is_none() {
            // Nothing renderable until a full sync establishes a baseline.
            self.buffer_pending(delta);
            return None;
        }

        if delta.seq > self.last_seq + 1 {
            log::debug!(
                "delta gap: have {}, got {}; buffering",
                self.last_seq,
                delta.seq
            );
            self.buffer_pending(delta);
            return self.state.as_ref();
        }

        self.apply_in_order(&delta);
        self.drain_pending();
        self.state.as_ref()
    }

    fn buffer_pending(&mut self, delta: GameStateDelta) {
        if self.pending.iter().any(|d| d.seq == delta.seq) {
            return;
        }
        let at = self
            .pending
            .iter()
            .position(|d| d.seq > delta.seq)
            .unwrap_or(self.pending.len());
        self.pending.insert(at, delta);

        // Oldest first out: the next full sync clears the buffer anyway.
        while self.pending.len() > MAX_PENDING_DELTAS {
            self.pending.remove(0);
        }
    }

    fn drain_pending(&mut self) {
        while let Some(head) = self.pending.first() {
            if head.seq <= self.last_seq {
                self.pending.remove(0);
            } else if head.seq == self.last_seq + 1 {
                let delta = self.pending.remove(0);
                self.apply_in_order(&delta);
            } else {
                break;
            }
        }
    }

    fn apply_in_order(&mut self, delta: &GameStateDelta) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        if let Some(p1) = &delta.p1 {
            merge_player(&mut state.p1, p1);
        }
        if let Some(p2) = &delta.p2 {
            merge_player(&mut state.p2, p2);
        }

        // Removals first, then updates, so a removed id re-spawned with the
        // same number in one delta lands as the new record.
        state
            .enemies
            .retain(|enemy| !delta.enemy_removals.contains(&enemy.id));
        for update in &delta.enemy_updates {
            merge_enemy(&mut state.enemies, update);
        }

        state
            .bullets
            .retain(|bullet| !delta.bullet_removals.contains(&bullet.id));
        for update in &delta.bullet_updates {
            merge_bullet(&mut state.bullets, update);
        }

        state
            .player_bullets
            .retain(|bullet| !delta.player_bullet_removals.contains(&bullet.id));
        for update in &delta.player_bullet_updates {
            merge_bullet(&mut state.player_bullets, update);
        }

        if let Some(wave) = delta.wave {
            state.wave = wave;
        }
        if let Some(score) = delta.score {
            state.score = score;
        }
        if let Some(active) = delta.intermission_active {
            state.intermission_active = active;
        }
        if let Some(countdown) = delta.countdown {
            state.countdown = countdown;
        }
        if let Some(pending_wave) = delta.pending_wave {
            state.pending_wave = pending_wave;
        }
        state.timestamp = delta.timestamp;

        self.last_seq = delta.seq;
    }

    pub fn reset(&mut self) {
        self.last_seq = 0;
        self.state = None;
        self.last_full = None;
        self.pending.clear();
    }
}

fn build_full_state(delta: &GameStateDelta) -> GameStateSync {
    let mut state = GameStateSync {
        timestamp: delta.timestamp,
        wave: delta.wave.unwrap_or_default(),
        score: delta.score.unwrap_or_default(),
        intermission_active: delta.intermission_active.unwrap_or_default(),
        countdown: delta.countdown.unwrap_or_default(),
        pending_wave: delta.pending_wave.unwrap_or_default(),
        ..GameStateSync::default()
    };

    if let Some(p1) = &delta.p1 {
        merge_player(&mut state.p1, p1);
    }
    if let Some(p2) = &delta.p2 {
        merge_player(&mut state.p2, p2);
    }
    for update in &delta.enemy_updates {
        merge_enemy(&mut state.enemies, update);
    }
    for update in &delta.bullet_updates {
        merge_bullet(&mut state.bullets, update);
    }
    for update in &delta.player_bullet_updates {
        merge_bullet(&mut state.player_bullets, update);
    }
    state
}

fn merge_player(player: &mut PlayerState, delta: &PlayerDelta) {
    if let Some([x, y]) = delta.pos {
        player.x = x;
        player.y = y;
    }
    if let Some(rotation) = delta.rotation {
        player.rotation = rotation;
    }
    if let Some(health) = delta.health {
        player.health = health;
    }
    if let Some(active) = delta.active {
        player.active = active;
    }
}

fn merge_enemy(enemies: &mut Vec<EnemyState>, update: &EnemyUpdate) {
    let at = match enemies.iter().position(|enemy| enemy.id == update.id) {
        Some(at) => at,
        None => {
            // Unknown id: insert with defaults for unspecified fields.
            enemies.push(EnemyState::new(update.id, update.kind.unwrap_or_default()));
            enemies.len() - 1
        }
    };
    let enemy = &mut enemies[at];

    if let Some(kind) = update.kind {
        enemy.kind = kind;
    }
    if let Some([x, y]) = update.pos {
        enemy.x = x;
        enemy.y = y;
    }
    if let Some([vx, vy]) = update.vel {
        enemy.vx = vx;
        enemy.vy = vy;
    }
    if let Some(health) = update.health {
        enemy.health = health;
    }
    if let Some(active) = update.active {
        enemy.active = active;
    }
}

fn merge_bullet(bullets: &mut Vec<BulletState>, update: &BulletUpdate) {
    let at = match bullets.iter().position(|bullet| bullet.id == update.id) {
        Some(at) => at,
        None => {
            bullets.push(BulletState {
                id: update.id,
                x: 0.0,
                y: 0.0,
                vx: 0.0,
                vy: 0.0,
            });
            bullets.len() - 1
        }
    };
    let bullet = &mut bullets[at];

    if let Some([x, y]) = update.pos {
        bullet.x = x;
        bullet.y = y;
    }
    if let Some([vx, vy]) = update.vel {
        bullet.vx = vx;
        bullet.vy = vy;
    }
}
