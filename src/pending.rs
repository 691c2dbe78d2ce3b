//! Pending-op queues (§2, §4.1 step 1, §4.2 step 1).
//!
//! Ops that arrive before a causal dependency (the move's new parent, or
//! the property write's target vertex) are parked here instead of being
//! treated as an error. They drain automatically once the dependency
//! appears in the snapshot.

use std::collections::HashMap;

use crate::id::VertexId;
use crate::op::{MoveOp, SetPropertyOp};

#[derive(Debug, Default)]
pub struct PendingQueues {
    /// Moves waiting on a parent vertex that doesn't exist yet.
    moves: HashMap<VertexId, Vec<MoveOp>>,
    /// Property writes waiting on their target vertex to be created.
    props: HashMap<VertexId, Vec<SetPropertyOp>>,
}

impl PendingQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park_move(&mut self, missing_parent: VertexId, op: MoveOp) {
        self.moves.entry(missing_parent).or_default().push(op);
    }

    pub fn park_property(&mut self, missing_target: VertexId, op: SetPropertyOp) {
        self.props.entry(missing_target).or_default().push(op);
    }

    /// Drain every move queued on `vertex_id` becoming a valid parent,
    /// in arrival order.
    pub fn drain_moves(&mut self, vertex_id: &str) -> Vec<MoveOp> {
        self.moves.remove(vertex_id).unwrap_or_default()
    }

    /// Drain every property write queued on `vertex_id` being created.
    pub fn drain_properties(&mut self, vertex_id: &str) -> Vec<SetPropertyOp> {
        self.props.remove(vertex_id).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty() && self.props.is_empty()
    }

    pub fn pending_move_count(&self) -> usize {
        self.moves.values().map(Vec::len).sum()
    }

    pub fn pending_property_count(&self) -> usize {
        self.props.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::OpId;

    #[test]
    fn parked_moves_drain_in_arrival_order() {
        let mut q = PendingQueues::new();
        q.park_move(
            "missing".into(),
            MoveOp { id: OpId::new(0, "p1"), target_id: "a".into(), parent_id: Some("missing".into()) },
        );
        q.park_move(
            "missing".into(),
            MoveOp { id: OpId::new(1, "p1"), target_id: "b".into(), parent_id: Some("missing".into()) },
        );
        let drained = q.drain_moves("missing");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].target_id, "a");
        assert_eq!(drained[1].target_id, "b");
        assert!(q.drain_moves("missing").is_empty());
    }
}
