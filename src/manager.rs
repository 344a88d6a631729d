use std::collections::VecDeque;

use crate::clock::{ClockSync, TickClock};
use crate::delta::{DeltaTracker, GuestStateBuffer};
use crate::input::{DEFAULT_INPUT_RING_CAPACITY, InputPacket, InputRing, PlayerInput};
use crate::interp::LatencyEstimator;
use crate::projectile::{ProjectileManager, ProjectileSpawn};
use crate::protocol::{
    DEFAULT_TICK_RATE, EventEnvelope, FULL_SYNC_INTERVAL_MS, GameEvent, INPUT_SEND_INTERVAL_MS,
    Message, PING_INTERVAL_MS, PeerRole, SNAPSHOT_SEND_INTERVAL_MS,
};
use crate::room::{NetError, Room, RoomEvent};
use crate::state::GameStateSync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Session-level tunables. Defaults match the shipped pacing: inputs at
/// 20Hz, snapshots at 5Hz, pings every 2s.
#[derive(Debug, Clone, Copy)]
pub struct NetConfig {
    pub tick_rate: u32,
    pub input_interval_ms: f64,
    pub snapshot_interval_ms: f64,
    pub ping_interval_ms: f64,
    pub full_sync_interval_ms: f64,
    pub input_ring_capacity: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            input_interval_ms: INPUT_SEND_INTERVAL_MS,
            snapshot_interval_ms: SNAPSHOT_SEND_INTERVAL_MS,
            ping_interval_ms: PING_INTERVAL_MS,
            full_sync_interval_ms: FULL_SYNC_INTERVAL_MS,
            input_ring_capacity: DEFAULT_INPUT_RING_CAPACITY,
        }
    }
}

/// One peer's view of a running netplay session.
///
/// The host simulates authoritatively and broadcasts state deltas; the guest
/// reconstructs from them. Inputs, projectile spawns, and events flow both
/// ways. All methods take the caller's clock explicitly (`now_ms`, the same
/// monotonic milliseconds used to stamp outgoing messages), so pacing and
/// sync behavior are driven entirely by the game loop.
pub struct NetSession<R: Room> {
    role: PeerRole,
    config: NetConfig,
    room: R,
    connection: ConnectionState,
    clock: TickClock,
    clock_sync: ClockSync,
    local_inputs: InputRing,
    remote_inputs: InputRing,
    projectiles: ProjectileManager,
    tracker: DeltaTracker,
    guest_state: GuestStateBuffer,
    latency: LatencyEstimator,
    events: VecDeque<EventEnvelope>,
    last_input_send_ms: f64,
    last_snapshot_send_ms: f64,
    last_ping_ms: f64,
    game_started: bool,
}

impl<R: Room> NetSession<R> {
    pub fn new(role: PeerRole, room: R, config: NetConfig) -> Self {
        Self {
            role,
            room,
            connection: ConnectionState::Connecting,
            clock: TickClock::new(config.tick_rate),
            clock_sync: ClockSync::new(),
            local_inputs: InputRing::new(config.input_ring_capacity),
            remote_inputs: InputRing::new(config.input_ring_capacity),
            projectiles: ProjectileManager::new(role, config.tick_rate),
            tracker: DeltaTracker::with_interval(config.full_sync_interval_ms),
            guest_state: GuestStateBuffer::new(),
            latency: LatencyEstimator::new(),
            events: VecDeque::new(),
            last_input_send_ms: f64::NEG_INFINITY,
            last_snapshot_send_ms: f64::NEG_INFINITY,
            last_ping_ms: f64::NEG_INFINITY,
            game_started: false,
            config,
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role.is_host()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn game_started(&self) -> bool {
        self.game_started
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn current_tick(&self, now_ms: f64) -> u64 {
        self.clock.current_tick(now_ms)
    }

    pub fn rtt_ms(&self) -> f64 {
        self.clock_sync.rtt_ms()
    }

    /// RTT statistics accumulated from pongs. The render layer should feed
    /// [`LatencyEstimator::recommended_delay_ms`] into
    /// [`crate::interp::JitterBuffer::set_delay_ms`] so the interpolation
    /// delay tracks measured link conditions.
    pub fn latency(&self) -> &LatencyEstimator {
        &self.latency
    }

    pub fn projectiles(&self) -> &ProjectileManager {
        &self.projectiles
    }

    pub fn projectiles_mut(&mut self) -> &mut ProjectileManager {
        &mut self.projectiles
    }

    /// The guest's reconstructed remote state. `None` on the host, and on
    /// the guest until the first full sync lands.
    pub fn remote_state(&self) -> Option<&GameStateSync> {
        self.guest_state.state()
    }

    pub fn remote_input(&self, tick: u64) -> Option<&PlayerInput> {
        self.remote_inputs.get(tick)
    }

    /// Newest remote input at or before `tick`, for ticks the peer's packet
    /// hasn't arrived for yet.
    pub fn latest_remote_input(&self, tick: u64) -> Option<&PlayerInput> {
        self.remote_inputs.get_latest(tick)
    }

    pub fn local_input(&self, tick: u64) -> Option<&PlayerInput> {
        self.local_inputs.get(tick)
    }

    /// Drive the session: poll the transport, dispatch inbound messages,
    /// and keep the ping cadence. Call once per frame.
    pub fn update(&mut self, now_ms: f64) {
        for event in self.room.poll() {
            match event {
                RoomEvent::PeerJoined => {
                    log::info!("peer joined as {:?}", self.role.other());
                    self.connection = ConnectionState::Connected;
                    self.send_ping(now_ms);
                }
                RoomEvent::PeerLeft => {
                    log::info!("peer left");
                    self.connection = ConnectionState::Connecting;
                }
                RoomEvent::Message(message) => self.handle_message(message, now_ms),
            }
        }

        if self.connection == ConnectionState::Connected
            && now_ms - self.last_ping_ms >= self.config.ping_interval_ms
        {
            self.send_ping(now_ms);
        }
    }

    fn handle_message(&mut self, message: Message, now_ms: f64) {
        match message {
            Message::Input(packet) => {
                let input = packet.decompress();
                self.remote_inputs.set(input.tick, input);
            }
            Message::Ping { t } => {
                self.try_send(&Message::Pong { t, st: now_ms });
            }
            Message::Pong { t, st } => {
                self.clock_sync.process_pong(t, st, now_ms);
                self.clock
                    .set_offset(self.clock_sync.offset_ticks(self.config.tick_rate));
                self.latency.add_sample(self.clock_sync.rtt_ms());
            }
            Message::Snapshot(delta) => {
                if self.is_host() {
                    log::warn!("host received a state snapshot; ignoring");
                } else {
                    self.guest_state.apply(delta);
                }
            }
            Message::ProjectileSpawn(spawn) => {
                if spawn.owner != self.role {
                    let tick = self.clock.current_tick(now_ms);
                    self.projectiles.spawn_remote(spawn, tick);
                }
            }
            Message::GameStart => {
                if !self.game_started {
                    log::info!("game start received");
                    self.game_started = true;
                    self.clock.start(now_ms);
                }
            }
            Message::Event(envelope) => {
                self.events.push_back(envelope);
            }
        }
    }

    /// Record a local input for `input.tick` and, at most once per input
    /// interval, send it to the peer. Returns whether a packet went out.
    pub fn send_input(&mut self, input: PlayerInput, now_ms: f64) -> Result<bool, NetError> {
        let packet = InputPacket::compress(&input);
        self.local_inputs.set(input.tick, input);

        if now_ms - self.last_input_send_ms < self.config.input_interval_ms {
            return Ok(false);
        }
        self.last_input_send_ms = now_ms;
        self.send(&Message::Input(packet))?;
        Ok(true)
    }

    /// Spawn a locally-owned projectile and announce it. Remote peers
    /// forward-integrate from the spawn tick, so this is fire-and-forget.
    pub fn fire_projectile(
        &mut self,
        x: f32,
        y: f32,
        vx: f32,
        vy: f32,
        now_ms: f64,
        seed: u32,
    ) -> Result<ProjectileSpawn, NetError> {
        let tick = self.clock.current_tick(now_ms);
        let spawn = self.projectiles.spawn_local(x, y, vx, vy, tick, seed);
        self.send(&Message::ProjectileSpawn(spawn))?;
        Ok(spawn)
    }

    /// Host only: diff the authoritative state and, at most once per
    /// snapshot interval, broadcast the delta. `force_full` requests a full
    /// sync regardless of timers. Returns whether a snapshot went out.
    pub fn send_snapshot(
        &mut self,
        state: &GameStateSync,
        now_ms: f64,
        force_full: bool,
    ) -> Result<bool, NetError> {
        if !self.is_host() {
            log::warn!("guest attempted to send a snapshot; ignoring");
            return Ok(false);
        }
        if !force_full && now_ms - self.last_snapshot_send_ms < self.config.snapshot_interval_ms {
            return Ok(false);
        }
        self.last_snapshot_send_ms = now_ms;
        let delta = self.tracker.generate(state, now_ms, force_full);
        self.send(&Message::Snapshot(delta))?;
        Ok(true)
    }

    pub fn send_event(&mut self, event: GameEvent, now_ms: f64) -> Result<(), NetError> {
        let envelope = EventEnvelope {
            tick: self.clock.current_tick(now_ms),
            event,
        };
        self.send(&Message::Event(envelope))
    }

    /// Host only: start the shared tick clock and tell the peer to do the
    /// same.
    pub fn signal_game_start(&mut self, now_ms: f64) -> Result<(), NetError> {
        if !self.is_host() {
            log::warn!("guest attempted to signal game start; ignoring");
            return Ok(());
        }
        self.game_started = true;
        self.clock.start(now_ms);
        self.send(&Message::GameStart)
    }

    /// Gameplay events received from the peer, in arrival order.
    pub fn drain_events(&mut self) -> Vec<EventEnvelope> {
        self.events.drain(..).collect()
    }

    /// Leave the room and reset every component to its pre-session state.
    pub fn disconnect(&mut self) {
        log::info!("disconnecting");
        self.room.leave();
        self.connection = ConnectionState::Disconnected;
        self.clock.reset();
        self.clock_sync.reset();
        self.local_inputs.clear();
        self.remote_inputs.clear();
        self.projectiles.clear();
        self.tracker.reset();
        self.guest_state.reset();
        self.latency.reset();
        self.events.clear();
        self.last_input_send_ms = f64::NEG_INFINITY;
        self.last_snapshot_send_ms = f64::NEG_INFINITY;
        self.last_ping_ms = f64::NEG_INFINITY;
        self.game_started = false;
    }

    fn send_ping(&mut self, now_ms: f64) {
        self.last_ping_ms = now_ms;
        self.try_send(&Message::Ping { t: now_ms });
    }

    fn send(&mut self, message: &Message) -> Result<(), NetError> {
        if let Err(err) = self.room.send(message) {
            log::error!("send failed on {}: {err}", message.channel());
            self.connection = ConnectionState::Error;
            return Err(err);
        }
        Ok(())
    }

    fn try_send(&mut self, message: &Message) {
        let _ = self.send(message);
    }
}
