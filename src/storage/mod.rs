//! The op-store bridge (§4.5): an external collaborator contract the
//! engine consults only from its `*_async` helpers. The synchronous API
//! never suspends (§5); these traits and their `sqlite` reference
//! implementation are the worked example of what a backend must supply.

pub mod sqlite;

pub use self::sqlite::SqliteStorage;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::id::VertexId;
use crate::op::{MoveOp, SetPropertyOp};
use crate::value::Value;

/// A vertex as persisted by a `VertexStore`, independent of the live
/// in-memory snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedVertex {
    pub id: VertexId,
    pub parent_id: Option<VertexId>,
    /// Monotonic per-parent ordering key, used by `get_children_page`
    /// for stable cursor pagination.
    pub idx: i64,
    pub properties: BTreeMap<String, Value>,
}

/// Options for scanning an op log (§4.5 `scan_range`).
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub peer_id: Option<String>,
    pub from_counter: Option<u64>,
    pub to_counter: Option<u64>,
    pub limit: Option<u64>,
    pub reverse: bool,
}

/// Backend for vertex persistence and paged child enumeration.
#[async_trait]
pub trait VertexStore: Send + Sync {
    async fn get_vertex(&self, id: &str) -> Result<Option<EncodedVertex>>;
    async fn put_vertex(&self, vertex: EncodedVertex) -> Result<()>;
    async fn get_children_page(
        &self,
        parent_id: &str,
        after_cursor: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(VertexId, i64)>>;
}

/// Backend for one append-only op log (one instance for moves, one for
/// properties, per §4.5).
#[async_trait]
pub trait LogStore<T>: Send + Sync {
    async fn append(&self, op: T) -> Result<u64>;
    async fn latest_seq(&self) -> Result<u64>;
    async fn scan_range(&self, opts: ScanOptions) -> BoxStream<'_, Result<T>>;
}

/// Backend selection for the reference bridge (§6 storage schema).
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// In-memory SQLite — useful for tests, not actually persistent.
    Memory,
    Sqlite { path: String },
}

/// The three capabilities the engine consumes from external storage,
/// bundled together (§4.5).
pub struct Storage {
    pub vertices: Box<dyn VertexStore>,
    pub move_log: Box<dyn LogStore<MoveOp>>,
    pub prop_log: Box<dyn LogStore<SetPropertyOp>>,
}

impl Storage {
    pub async fn new(config: StorageConfig) -> Result<Self> {
        let path = match &config {
            StorageConfig::Memory => ":memory:",
            StorageConfig::Sqlite { path } => path.as_str(),
        };
        let storage = SqliteStorage::new(path).await?;
        Ok(Self {
            vertices: Box::new(storage.clone()),
            move_log: Box::new(storage.clone()),
            prop_log: Box::new(storage),
        })
    }
}
