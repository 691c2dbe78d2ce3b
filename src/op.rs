//! Operation types (§2, §4.6).
//!
//! Vertex creation has no separate representation: a `Move` whose
//! `target_id` has never been seen before both creates and places the
//! vertex (§2, §3 "Lifecycle").

use serde::{Deserialize, Serialize};

use crate::id::{OpId, VertexId};
use crate::value::Value;

/// Move `target_id` under `parent_id` (`None` = root level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveOp {
    pub id: OpId,
    pub target_id: VertexId,
    pub parent_id: Option<VertexId>,
}

/// Write one `(target_id, key)` slot. `value: None` encodes deletion.
/// Transient ops are local-only and must never cross the wire (§4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPropertyOp {
    pub id: OpId,
    pub target_id: VertexId,
    pub key: String,
    pub value: Option<Value>,
    pub transient: bool,
}

/// Tagged union of the two operation kinds the engine applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Op {
    #[serde(rename = "move")]
    Move(MoveOp),
    #[serde(rename = "set")]
    Set(SetPropertyOp),
}

impl Op {
    pub fn id(&self) -> &OpId {
        match self {
            Op::Move(m) => &m.id,
            Op::Set(s) => &s.id,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Op::Set(s) if s.transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_sort_by_op_id() {
        let mut ops = vec![
            Op::Move(MoveOp { id: OpId::new(3, "p1"), target_id: "a".into(), parent_id: None }),
            Op::Move(MoveOp { id: OpId::new(1, "p2"), target_id: "b".into(), parent_id: None }),
        ];
        ops.sort_by(|a, b| a.id().cmp(b.id()));
        assert_eq!(ops[0].id().counter, 1);
    }

    #[test]
    fn transient_set_is_flagged() {
        let op = Op::Set(SetPropertyOp {
            id: OpId::new(0, "p1"),
            target_id: "a".into(),
            key: "k".into(),
            value: Some(Value::from("v")),
            transient: true,
        });
        assert!(op.is_transient());
    }
}
