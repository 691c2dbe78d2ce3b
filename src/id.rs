//! Operation identifiers and the per-replica Lamport counter.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Opaque vertex identity. Globally unique, assigned by whichever peer
/// first moves a vertex into existence.
pub type VertexId = String;

/// Identity of a replica. Any string the deployment considers unique
/// (UUID, device id, ...).
pub type PeerId = String;

/// The largest counter value that round-trips through the `f64`-backed
/// JSON number domain used by the wire encoding (§4.6).
pub const MAX_SAFE_COUNTER: u64 = (1u64 << 53) - 1;

/// Totally ordered identifier attached to every operation: a Lamport
/// counter paired with the originating peer as a tiebreaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub counter: u64,
    pub peer_id: PeerId,
}

impl OpId {
    pub fn new(counter: u64, peer_id: impl Into<PeerId>) -> Self {
        Self {
            counter,
            peer_id: peer_id.into(),
        }
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.peer_id.cmp(&other.peer_id))
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-replica Lamport clock. Bumped on every locally originated op and
/// fast-forwarded on receipt of any remote op with a larger counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct LamportClock {
    counter: u64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// Mint a fresh local `OpId` and advance the clock past it.
    pub fn tick(&mut self, peer_id: &str) -> OpId {
        let counter = self.counter;
        self.counter += 1;
        OpId::new(counter, peer_id.to_string())
    }

    /// Fast-forward the clock past a counter observed on an applied op
    /// (local or remote), per §2: "fast-forwarded on receipt of any
    /// remote op with a larger counter".
    pub fn observe(&mut self, counter: u64) {
        self.counter = std::cmp::max(self.counter, counter + 1);
    }

    pub fn current(&self) -> u64 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_counter_then_peer() {
        let a = OpId::new(1, "p1");
        let b = OpId::new(1, "p2");
        let c = OpId::new(2, "p1");
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn clock_fast_forwards_on_observe() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.tick("p1").counter, 0);
        clock.observe(10);
        assert_eq!(clock.current(), 11);
        assert_eq!(clock.tick("p1").counter, 11);
    }
}
