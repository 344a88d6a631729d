use bitflags::bitflags;
use rkyv::{Archive, Deserialize, Serialize};

pub const DEFAULT_INPUT_RING_CAPACITY: usize = 64;

const AXIS_SCALE: f32 = 127.0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InputFlags: u8 {
        const FIRE = 1 << 0;
        const DASH = 1 << 1;
    }
}

/// One tick of player intent. Axes are normalized to [-1, 1]; immutable once
/// produced by the owning peer.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlayerInput {
    pub tick: u64,
    pub move_x: f32,
    pub move_y: f32,
    pub aim_x: f32,
    pub aim_y: f32,
    pub fire: bool,
    pub dash: bool,
}

impl PlayerInput {
    pub fn idle(tick: u64) -> Self {
        Self {
            tick,
            move_x: 0.0,
            move_y: 0.0,
            aim_x: 0.0,
            aim_y: 0.0,
            fire: false,
            dash: false,
        }
    }
}

/// Wire form of [`PlayerInput`]: axes quantized to signed 8-bit fixed point,
/// booleans packed into one flags byte. Callers guarantee axes are in
/// [-1, 1]; out-of-range values are not re-clamped and decode as garbage
/// rather than erroring (the wire format has no validation layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct InputPacket {
    pub tick: u64,
    pub move_x: i8,
    pub move_y: i8,
    pub aim_x: i8,
    pub aim_y: i8,
    pub flags: u8,
}

impl InputPacket {
    pub fn compress(input: &PlayerInput) -> Self {
        let mut flags = InputFlags::empty();
        flags.set(InputFlags::FIRE, input.fire);
        flags.set(InputFlags::DASH, input.dash);

        Self {
            tick: input.tick,
            move_x: quantize(input.move_x),
            move_y: quantize(input.move_y),
            aim_x: quantize(input.aim_x),
            aim_y: quantize(input.aim_y),
            flags: flags.bits(),
        }
    }

    pub fn decompress(&self) -> PlayerInput {
        let flags = InputFlags::from_bits_truncate(self.flags);

        PlayerInput {
            tick: self.tick,
            move_x: self.move_x as f32 / AXIS_SCALE,
            move_y: self.move_y as f32 / AXIS_SCALE,
            aim_x: self.aim_x as f32 / AXIS_SCALE,
            aim_y: self.aim_y as f32 / AXIS_SCALE,
            fire: flags.contains(InputFlags::FIRE),
            dash: flags.contains(InputFlags::DASH),
        }
    }
}

fn quantize(axis: f32) -> i8 {
    (axis * AXIS_SCALE).round() as i8
}

/// Fixed-capacity store of recent inputs keyed by tick modulo capacity.
/// Slots are tick-tagged so wrapped-around stale data never masquerades as
/// the requested tick. Misses return `None`, never panic; duplicate `set`
/// calls for a tick are last-write-wins.
#[derive(Debug)]
pub struct InputRing {
    slots: Vec<Option<PlayerInput>>,
    capacity: usize,
}

impl Default for InputRing {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_RING_CAPACITY)
    }
}

impl InputRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set(&mut self, tick: u64, input: PlayerInput) {
        let index = (tick % self.capacity as u64) as usize;
        self.slots[index] = Some(PlayerInput { tick, ..input });
    }

    pub fn get(&self, tick: u64) -> Option<&PlayerInput> {
        let index = (tick % self.capacity as u64) as usize;
        self.slots[index].as_ref().filter(|input| input.tick == tick)
    }

    /// Most recent stored input at or before `max_tick`, scanning back at
    /// most one full ring of ticks.
    pub fn get_latest(&self, max_tick: u64) -> Option<&PlayerInput> {
        for back in 0..self.capacity as u64 {
            let Some(tick) = max_tick.checked_sub(back) else {
                break;
            };
            if let Some(input) = self.get(tick) {
                return Some(input);
            }
        }
        None
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input(tick: u64) -> PlayerInput {
        PlayerInput {
            tick,
            move_x: 0.5,
            move_y: -1.0,
            aim_x: 0.25,
            aim_y: 1.0,
            fire: true,
            dash: false,
        }
    }

    #[test]
    fn compress_roundtrip_within_quantization_error() {
        let input = sample_input(42);
        let back = InputPacket::compress(&input).decompress();

        assert_eq!(back.tick, 42);
        assert!((back.move_x - input.move_x).abs() <= 1.0 / 127.0);
        assert!((back.move_y - input.move_y).abs() <= 1.0 / 127.0);
        assert!((back.aim_x - input.aim_x).abs() <= 1.0 / 127.0);
        assert!((back.aim_y - input.aim_y).abs() <= 1.0 / 127.0);
        assert_eq!(back.fire, input.fire);
        assert_eq!(back.dash, input.dash);
    }

    #[test]
    fn known_packet_decompresses_exactly() {
        let packet = InputPacket {
            tick: 5,
            move_x: 127,
            move_y: -127,
            aim_x: 64,
            aim_y: 0,
            flags: 3,
        };
        let input = packet.decompress();

        assert_eq!(input.tick, 5);
        assert_eq!(input.move_x, 1.0);
        assert_eq!(input.move_y, -1.0);
        assert!((input.aim_x - 0.5039).abs() < 0.0001);
        assert_eq!(input.aim_y, 0.0);
        assert!(input.fire);
        assert!(input.dash);
    }

    #[test]
    fn full_deflection_quantizes_to_limits() {
        let mut input = sample_input(0);
        input.move_x = 1.0;
        input.move_y = -1.0;

        let packet = InputPacket::compress(&input);
        assert_eq!(packet.move_x, 127);
        assert_eq!(packet.move_y, -127);
    }

    #[test]
    fn ring_get_requires_matching_tick() {
        let mut ring = InputRing::new(64);
        ring.set(10, sample_input(10));

        assert!(ring.get(10).is_some());
        // Same slot, different tick.
        assert!(ring.get(10 + 64).is_none());

        // Overwriting the slot with an aliased tick evicts the original.
        ring.set(10 + 64, sample_input(10 + 64));
        assert!(ring.get(10).is_none());
        assert_eq!(ring.get(74).unwrap().tick, 74);
    }

    #[test]
    fn ring_survives_full_wrap_of_other_ticks() {
        let mut ring = InputRing::new(64);
        ring.set(100, sample_input(100));

        for tick in 101..164 {
            ring.set(tick, sample_input(tick));
        }

        assert_eq!(ring.get(100).unwrap().tick, 100);
    }

    #[test]
    fn get_latest_scans_backward_within_window() {
        let mut ring = InputRing::new(64);
        ring.set(50, sample_input(50));

        assert_eq!(ring.get_latest(55).unwrap().tick, 50);
        assert!(ring.get_latest(49).is_none());
        // Out of the 64-tick window.
        assert!(ring.get_latest(50 + 64).is_none());
    }

    #[test]
    fn get_latest_near_zero_does_not_underflow() {
        let ring = InputRing::new(64);
        assert!(ring.get_latest(3).is_none());
    }

    #[test]
    fn clear_resets_all_slots() {
        let mut ring = InputRing::new(8);
        for tick in 0..8 {
            ring.set(tick, sample_input(tick));
        }
        ring.clear();

        assert!(ring.get_latest(7).is_none());
    }
}
