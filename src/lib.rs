//! RepTree: a replicated, tree-structured CRDT data store.
//!
//! Every replica holds an independent copy of the tree; peers exchange
//! [`Op`]s and converge to identical structure and property values
//! regardless of delivery order. The engine implements the Kleppmann
//! move-tree algorithm for structural conflicts (undo/do/redo of newer
//! moves when an older one arrives late) layered under a last-writer-wins
//! property store, with range-based state vectors driving minimal sync.

pub mod engine;
pub mod error;
pub mod events;
pub mod id;
pub mod op;
pub mod pending;
pub mod snapshot;
pub mod state_vector;
pub mod storage;
pub mod value;

pub use engine::{RepTree, TxOutcome, VertexView};
pub use error::{Error, Result, StorageError};
pub use id::{OpId, PeerId, VertexId};
pub use op::{MoveOp, Op, SetPropertyOp};
pub use state_vector::{Range, StateVector};
pub use value::Value;
