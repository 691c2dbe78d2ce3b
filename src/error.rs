//! Error types for the RepTree CRDT engine.

use thiserror::Error;

use crate::id::VertexId;

/// Result type for RepTree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the engine's public API.
///
/// Causal deferrals (unknown parent/target) and benign rejections
/// (cycle-inducing moves, duplicate ops) are never represented here —
/// they are logged and absorbed internally instead of surfacing as
/// errors to the caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("vertex not found: {0}")]
    VertexNotFound(VertexId),

    #[error("a root vertex already exists")]
    RootAlreadyExists,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid property value for key {key:?}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("counter {0} exceeds the 53-bit safe integer range")]
    CounterOutOfRange(u64),

    #[error("history unavailable: range [{lo},{hi}] for peer {peer} was pruned and the backing store could not supply it")]
    PrunedHistory { peer: String, lo: u64, hi: u64 },
}

/// Errors from the op-store bridge (external log/vertex storage).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
