use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::protocol::{Message, WireError};

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("wire codec error: {0}")]
    Wire(#[from] WireError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not connected")]
    NotConnected,
}

/// Transport-level notifications surfaced by [`Room::poll`].
#[derive(Debug)]
pub enum RoomEvent {
    PeerJoined,
    PeerLeft,
    Message(Message),
}

/// A two-seat unreliable datagram channel. Implementations deliver whole
/// messages or nothing; ordering and delivery are not guaranteed, which is
/// exactly what the layers above are built to tolerate.
pub trait Room {
    fn send(&mut self, message: &Message) -> Result<(), NetError>;
    fn poll(&mut self) -> Vec<RoomEvent>;
    fn leave(&mut self);
}

/// Synthetic link impairments for the loopback room.
#[derive(Debug, Clone, Copy)]
pub struct LinkConditions {
    /// 0-100, chance an outgoing message is dropped.
    pub loss_percent: u8,
    /// 0-100, chance an outgoing message is delivered twice.
    pub duplicate_percent: u8,
    pub seed: u64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            loss_percent: 0,
            duplicate_percent: 0,
            seed: 0x5eed_5eed,
        }
    }
}

impl LinkConditions {
    pub fn lossy(loss_percent: u8, seed: u64) -> Self {
        Self {
            loss_percent,
            duplicate_percent: 0,
            seed,
        }
    }
}

#[derive(Debug)]
struct LoopbackWire {
    // One inbound queue per seat, bytes as they would cross the network.
    queues: [VecDeque<Vec<u8>>; 2],
    present: [bool; 2],
    conditions: LinkConditions,
    rng: u64,
}

impl LoopbackWire {
    fn roll_percent(&mut self) -> u8 {
        // LCG, constants from Knuth. Deterministic per seed so lossy tests
        // are reproducible.
        self.rng = self
            .rng
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.rng >> 33) % 100) as u8
    }
}

/// In-process [`Room`] joining two endpoints over shared queues, with
/// optional loss and duplication. Used by the session tests; a production
/// build plugs a real datagram transport into the same trait.
#[derive(Debug)]
pub struct LoopbackRoom {
    wire: Rc<RefCell<LoopbackWire>>,
    seat: usize,
    joined: bool,
    peer_seen: bool,
}

impl LoopbackRoom {
    /// Create both ends of a connected pair.
    pub fn pair(conditions: LinkConditions) -> (Self, Self) {
        let wire = Rc::new(RefCell::new(LoopbackWire {
            queues: [VecDeque::new(), VecDeque::new()],
            present: [true, true],
            conditions,
            rng: conditions.seed.max(1),
        }));
        (
            Self {
                wire: Rc::clone(&wire),
                seat: 0,
                joined: true,
                peer_seen: false,
            },
            Self {
                wire,
                seat: 1,
                joined: true,
                peer_seen: false,
            },
        )
    }
}

impl Room for LoopbackRoom {
    fn send(&mut self, message: &Message) -> Result<(), NetError> {
        if !self.joined {
            return Err(NetError::NotConnected);
        }
        let bytes = message.serialize()?;

        let mut wire = self.wire.borrow_mut();
        let peer = 1 - self.seat;
        if !wire.present[peer] {
            // Peer gone: datagram semantics, silently dropped.
            return Ok(());
        }

        let loss = wire.conditions.loss_percent;
        if loss > 0 && wire.roll_percent() < loss {
            log::trace!("loopback dropped {} message", message.channel());
            return Ok(());
        }

        let dup = wire.conditions.duplicate_percent;
        let copies = if dup > 0 && wire.roll_percent() < dup {
            2
        } else {
            1
        };
        for _ in 0..copies {
            wire.queues[peer].push_back(bytes.clone());
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        if !self.joined {
            return events;
        }

        let mut wire = self.wire.borrow_mut();
        let peer_present = wire.present[1 - self.seat];
        if peer_present && !self.peer_seen {
            events.push(RoomEvent::PeerJoined);
        } else if !peer_present && self.peer_seen {
            events.push(RoomEvent::PeerLeft);
        }
        self.peer_seen = peer_present;

        while let Some(bytes) = wire.queues[self.seat].pop_front() {
            match Message::deserialize(&bytes) {
                Ok(message) => events.push(RoomEvent::Message(message)),
                Err(err) => log::warn!("dropping undecodable message: {err}"),
            }
        }
        events
    }

    fn leave(&mut self) {
        if !self.joined {
            return;
        }
        self.joined = false;
        let mut wire = self.wire.borrow_mut();
        wire.present[self.seat] = false;
        wire.queues[self.seat].clear();
    }
}
