use std::collections::{HashMap, VecDeque};

use glam::Vec2;

/// Render-side delay applied behind the newest sample, in ms.
pub const DEFAULT_JITTER_DELAY_MS: f64 = 100.0;
/// How long after the newest sample we keep interpolating before switching
/// to dead reckoning.
pub const EXTRAPOLATION_HOLD_MS: f64 = 50.0;
/// Dead reckoning cap. Past this the entity freezes rather than flying off.
pub const MAX_EXTRAPOLATION_MS: f64 = 200.0;
/// Distance past which smoothing gives way to a hard snap, in px.
pub const SNAP_THRESHOLD: f32 = 100.0;

const MAX_JITTER_SAMPLES: usize = 10;
const MAX_HISTORY: usize = 8;
const MIN_RECOMMENDED_DELAY_MS: f64 = 50.0;
const MAX_LATENCY_SAMPLES: usize = 20;

/// One timestamped observation of a remote entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySample {
    pub pos: Vec2,
    pub vel: Option<Vec2>,
    pub rotation: Option<f32>,
    pub timestamp: f64,
}

impl EntitySample {
    pub fn new(pos: Vec2, timestamp: f64) -> Self {
        Self {
            pos,
            vel: None,
            rotation: None,
            timestamp,
        }
    }
}

/// Timestamp-ordered sample window. Rendering reads a fixed delay behind
/// the newest sample so irregular arrival spacing is absorbed instead of
/// showing up as stutter.
#[derive(Debug)]
pub struct JitterBuffer {
    samples: Vec<EntitySample>,
    delay_ms: f64,
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER_DELAY_MS)
    }
}

impl JitterBuffer {
    pub fn new(delay_ms: f64) -> Self {
        Self {
            samples: Vec::with_capacity(MAX_JITTER_SAMPLES),
            delay_ms,
        }
    }

    pub fn delay_ms(&self) -> f64 {
        self.delay_ms
    }

    /// Adjust the render delay, e.g. from a [`LatencyEstimator`]
    /// recommendation.
    pub fn set_delay_ms(&mut self, delay_ms: f64) {
        self.delay_ms = delay_ms.max(0.0);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn newest(&self) -> Option<&EntitySample> {
        self.samples.last()
    }

    pub fn push(&mut self, sample: EntitySample) {
        let at = self
            .samples
            .iter()
            .position(|s| s.timestamp > sample.timestamp)
            .unwrap_or(self.samples.len());
        self.samples.insert(at, sample);

        while self.samples.len() > MAX_JITTER_SAMPLES {
            self.samples.remove(0);
        }
    }

    /// Bracketing samples around `now_ms - delay` and the interpolation
    /// fraction between them. Clamps to the window edges when the target
    /// time falls outside the buffer.
    pub fn sample_at(&self, now_ms: f64) -> Option<(&EntitySample, &EntitySample, f32)> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;
        let target = now_ms - self.delay_ms;

        if target <= first.timestamp {
            return Some((first, first, 0.0));
        }
        if target >= last.timestamp {
            return Some((last, last, 1.0));
        }

        for pair in self.samples.windows(2) {
            let (before, after) = (&pair[0], &pair[1]);
            if target >= before.timestamp && target <= after.timestamp {
                let span = after.timestamp - before.timestamp;
                let t = if span > 0.0 {
                    ((target - before.timestamp) / span) as f32
                } else {
                    1.0
                };
                return Some((before, after, t));
            }
        }
        Some((last, last, 1.0))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Smoothed position/rotation follower for one remote entity.
///
/// While fresh samples keep arriving the displayed position eases toward the
/// newest target. Once samples go quiet past [`EXTRAPOLATION_HOLD_MS`] the
/// target itself is advanced along the last known velocity, capped at
/// [`MAX_EXTRAPOLATION_MS`] so a dead link leaves the entity parked, not
/// orbiting the far side of the arena.
#[derive(Debug)]
pub struct EntityInterpolator {
    current: Vec2,
    current_rotation: f32,
    target: Option<EntitySample>,
    velocity: Option<Vec2>,
    history: VecDeque<EntitySample>,
    smoothing: f32,
    initialized: bool,
}

impl Default for EntityInterpolator {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl EntityInterpolator {
    pub fn new(smoothing: f32) -> Self {
        Self {
            current: Vec2::ZERO,
            current_rotation: 0.0,
            target: None,
            velocity: None,
            history: VecDeque::with_capacity(MAX_HISTORY),
            smoothing: smoothing.clamp(0.0, 1.0),
            initialized: false,
        }
    }

    pub fn update_target(&mut self, sample: EntitySample) {
        self.velocity = sample.vel.or_else(|| self.derive_velocity(&sample));

        self.history.push_back(sample);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }

        if !self.initialized {
            self.current = sample.pos;
            if let Some(rotation) = sample.rotation {
                self.current_rotation = rotation;
            }
            self.initialized = true;
        }
        self.target = Some(sample);
    }

    fn derive_velocity(&self, sample: &EntitySample) -> Option<Vec2> {
        let prev = self.history.back()?;
        let dt = (sample.timestamp - prev.timestamp) / 1000.0;
        if dt <= 0.0 {
            return None;
        }
        Some((sample.pos - prev.pos) / dt as f32)
    }

    /// Advance the displayed position one frame. `dt` is the frame delta in
    /// seconds, `now_ms` the same clock the samples were stamped with.
    pub fn step(&mut self, now_ms: f64, dt: f32) -> Vec2 {
        let Some(target) = self.target else {
            return self.current;
        };

        let mut goal = target.pos;
        let elapsed = now_ms - target.timestamp;
        if elapsed > EXTRAPOLATION_HOLD_MS {
            if let Some(vel) = self.velocity {
                let lead = (elapsed.min(MAX_EXTRAPOLATION_MS) / 1000.0) as f32;
                goal = target.pos + vel * lead;
            }
        }

        if self.current.distance_squared(goal) > SNAP_THRESHOLD * SNAP_THRESHOLD {
            self.current = goal;
        } else {
            // Frame-rate independent easing: equivalent to applying the
            // per-frame factor at a 60 fps reference rate.
            let alpha = 1.0 - (1.0 - self.smoothing).powf(dt * 60.0);
            self.current = self.current.lerp(goal, alpha);
        }

        if let Some(rotation) = target.rotation {
            let alpha = 1.0 - (1.0 - self.smoothing).powf(dt * 60.0);
            let diff = shortest_angle(rotation - self.current_rotation);
            self.current_rotation += diff * alpha;
        }

        self.current
    }

    pub fn position(&self) -> Vec2 {
        self.current
    }

    pub fn rotation(&self) -> f32 {
        self.current_rotation
    }

    pub fn reset(&mut self) {
        self.current = Vec2::ZERO;
        self.current_rotation = 0.0;
        self.target = None;
        self.velocity = None;
        self.history.clear();
        self.initialized = false;
    }
}

/// Wrap an angle difference into `[-PI, PI]` so rotation always eases along
/// the short way around.
pub fn shortest_angle(angle: f32) -> f32 {
    let mut wrapped = angle % std::f32::consts::TAU;
    if wrapped > std::f32::consts::PI {
        wrapped -= std::f32::consts::TAU;
    } else if wrapped < -std::f32::consts::PI {
        wrapped += std::f32::consts::TAU;
    }
    wrapped
}

#[derive(Debug, Clone, Copy)]
struct BulletTrack {
    pos: Vec2,
    vel: Vec2,
    timestamp: f64,
}

/// Pure dead reckoning for remote bullets. Bullets fly straight, so between
/// (rare) velocity updates their position is simply integrated forward; no
/// smoothing pass is applied.
#[derive(Debug, Default)]
pub struct BulletPredictor {
    tracks: HashMap<u32, BulletTrack>,
}

impl BulletPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, id: u32, pos: Vec2, vel: Vec2, now_ms: f64) {
        self.tracks.insert(
            id,
            BulletTrack {
                pos,
                vel,
                timestamp: now_ms,
            },
        );
    }

    pub fn predict(&self, id: u32, now_ms: f64) -> Option<Vec2> {
        let track = self.tracks.get(&id)?;
        let lead = ((now_ms - track.timestamp).max(0.0).min(MAX_EXTRAPOLATION_MS) / 1000.0) as f32;
        Some(track.pos + track.vel * lead)
    }

    pub fn remove(&mut self, id: u32) {
        self.tracks.remove(&id);
    }

    pub fn retain_ids(&mut self, live: &[u32]) {
        self.tracks.retain(|id, _| live.contains(id));
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

/// Rolling RTT window used to size the jitter buffer delay.
#[derive(Debug, Default)]
pub struct LatencyEstimator {
    samples: VecDeque<f64>,
}

impl LatencyEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(&mut self, rtt_ms: f64) {
        self.samples.push_back(rtt_ms);
        while self.samples.len() > MAX_LATENCY_SAMPLES {
            self.samples.pop_front();
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn mean_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Standard deviation of the RTT window.
    pub fn jitter_ms(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let mean = self.mean_ms();
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f64>()
            / self.samples.len() as f64;
        variance.sqrt()
    }

    /// Mean plus two standard deviations, floored at 50ms. Covers ~95% of
    /// arrival spacing under a roughly normal jitter distribution.
    pub fn recommended_delay_ms(&self) -> f64 {
        (self.mean_ms() + 2.0 * self.jitter_ms()).max(MIN_RECOMMENDED_DELAY_MS)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f32, y: f32, ts: f64) -> EntitySample {
        EntitySample::new(Vec2::new(x, y), ts)
    }

    #[test]
    fn jitter_buffer_orders_and_bounds() {
        let mut buf = JitterBuffer::default();
        buf.push(sample(2.0, 0.0, 200.0));
        buf.push(sample(1.0, 0.0, 100.0));
        buf.push(sample(3.0, 0.0, 300.0));

        assert_eq!(buf.len(), 3);
        assert_eq!(buf.newest().unwrap().timestamp, 300.0);

        for i in 0..20 {
            buf.push(sample(i as f32, 0.0, 400.0 + i as f64));
        }
        assert_eq!(buf.len(), MAX_JITTER_SAMPLES);
    }

    #[test]
    fn sample_at_brackets_target_time() {
        let mut buf = JitterBuffer::new(100.0);
        buf.push(sample(0.0, 0.0, 1000.0));
        buf.push(sample(10.0, 0.0, 1200.0));

        // target = 1200 - 100 = 1100, midway between samples
        let (before, after, t) = buf.sample_at(1200.0).unwrap();
        assert_eq!(before.timestamp, 1000.0);
        assert_eq!(after.timestamp, 1200.0);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn sample_at_clamps_to_edges() {
        let mut buf = JitterBuffer::new(100.0);
        buf.push(sample(0.0, 0.0, 1000.0));
        buf.push(sample(10.0, 0.0, 1200.0));

        let (before, after, t) = buf.sample_at(500.0).unwrap();
        assert_eq!(before.timestamp, after.timestamp);
        assert_eq!(t, 0.0);

        let (_, after, t) = buf.sample_at(5000.0).unwrap();
        assert_eq!(after.timestamp, 1200.0);
        assert_eq!(t, 1.0);
    }

    #[test]
    fn interpolator_initializes_at_first_sample() {
        let mut interp = EntityInterpolator::default();
        interp.update_target(sample(50.0, 20.0, 1000.0));
        assert_eq!(interp.position(), Vec2::new(50.0, 20.0));
    }

    #[test]
    fn interpolator_eases_toward_target() {
        let mut interp = EntityInterpolator::new(0.3);
        interp.update_target(sample(0.0, 0.0, 1000.0));
        interp.update_target(sample(10.0, 0.0, 1050.0));

        let pos = interp.step(1050.0, 1.0 / 60.0);
        assert!(pos.x > 0.0 && pos.x < 10.0);

        // Repeated stepping converges.
        let mut last = pos.x;
        for _ in 0..200 {
            let pos = interp.step(1050.0, 1.0 / 60.0);
            assert!(pos.x + 1e-3 >= last);
            last = pos.x;
        }
        assert!((last - 10.0).abs() < 0.5);
    }

    #[test]
    fn large_error_snaps_instead_of_gliding() {
        let mut interp = EntityInterpolator::new(0.3);
        interp.update_target(sample(0.0, 0.0, 1000.0));
        interp.update_target(sample(500.0, 0.0, 1050.0));

        let pos = interp.step(1050.0, 1.0 / 60.0);
        assert_eq!(pos, Vec2::new(500.0, 0.0));
    }

    #[test]
    fn stale_target_extrapolates_along_velocity() {
        let mut interp = EntityInterpolator::new(1.0);
        let mut s = sample(0.0, 0.0, 1000.0);
        s.vel = Some(Vec2::new(100.0, 0.0));
        interp.update_target(s);

        // 100ms past the sample: 100 px/s for 0.1s ahead.
        let pos = interp.step(1100.0, 1.0 / 60.0);
        assert!((pos.x - 10.0).abs() < 1e-3);
    }

    #[test]
    fn extrapolation_is_capped() {
        let mut interp = EntityInterpolator::new(1.0);
        let mut s = sample(0.0, 0.0, 1000.0);
        s.vel = Some(Vec2::new(100.0, 0.0));
        interp.update_target(s);

        // Ancient sample: lead clamps to 200ms worth of travel, inside the
        // snap radius so smoothing (factor 1.0) lands exactly on the goal.
        let pos = interp.step(9000.0, 1.0 / 60.0);
        assert!((pos.x - 20.0).abs() < 1e-3);
    }

    #[test]
    fn velocity_derived_from_history_when_absent() {
        let mut interp = EntityInterpolator::new(1.0);
        interp.update_target(sample(0.0, 0.0, 1000.0));
        // 10px in 100ms: 100 px/s
        interp.update_target(sample(10.0, 0.0, 1100.0));

        let pos = interp.step(1300.0, 1.0 / 60.0);
        // 200ms stale: target 10 + 100 * 0.2 = 30
        assert!((pos.x - 30.0).abs() < 1e-3);
    }

    #[test]
    fn rotation_takes_shortest_arc() {
        let pi = std::f32::consts::PI;
        assert!((shortest_angle(1.9 * pi) + 0.1 * pi).abs() < 1e-5);
        assert!((shortest_angle(-1.9 * pi) - 0.1 * pi).abs() < 1e-5);
        assert!((shortest_angle(0.5 * pi) - 0.5 * pi).abs() < 1e-6);

        let mut interp = EntityInterpolator::new(1.0);
        let mut s = sample(0.0, 0.0, 1000.0);
        s.rotation = Some(0.1);
        interp.update_target(s);
        let mut s = sample(0.0, 0.0, 1050.0);
        s.rotation = Some(std::f32::consts::TAU - 0.1);
        interp.update_target(s);

        interp.step(1050.0, 1.0 / 60.0);
        // Eases backward through zero, not forward through a full turn.
        assert!(interp.rotation() < 0.1);
    }

    #[test]
    fn bullet_predictor_integrates_forward() {
        let mut pred = BulletPredictor::new();
        pred.observe(7, Vec2::new(0.0, 0.0), Vec2::new(300.0, 0.0), 1000.0);

        let pos = pred.predict(7, 1100.0).unwrap();
        assert!((pos.x - 30.0).abs() < 1e-3);

        // Cap applies here too.
        let pos = pred.predict(7, 9000.0).unwrap();
        assert!((pos.x - 60.0).abs() < 1e-3);

        assert!(pred.predict(8, 1100.0).is_none());
        pred.retain_ids(&[]);
        assert!(pred.is_empty());
    }

    #[test]
    fn latency_estimator_recommends_padded_delay() {
        let mut est = LatencyEstimator::new();
        assert_eq!(est.recommended_delay_ms(), 50.0);

        for _ in 0..10 {
            est.add_sample(40.0);
        }
        // Zero jitter, mean below floor: floor wins.
        assert_eq!(est.recommended_delay_ms(), 50.0);

        est.reset();
        for rtt in [80.0, 120.0, 80.0, 120.0] {
            est.add_sample(rtt);
        }
        assert!((est.mean_ms() - 100.0).abs() < 1e-9);
        assert!((est.jitter_ms() - 20.0).abs() < 1e-9);
        assert!((est.recommended_delay_ms() - 140.0).abs() < 1e-9);
    }

    #[test]
    fn latency_window_is_bounded() {
        let mut est = LatencyEstimator::new();
        for i in 0..50 {
            est.add_sample(i as f64);
        }
        assert_eq!(est.sample_count(), MAX_LATENCY_SAMPLES);
        // Only the newest 20 samples (30..49) survive.
        assert!((est.mean_ms() - 39.5).abs() < 1e-9);
    }
}
