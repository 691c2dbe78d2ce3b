//! Reference SQLite implementation of the op-store bridge (§4.5, §6
//! storage schema).

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::error::{Error, Result, StorageError};
use crate::id::{OpId, VertexId};
use crate::op::{MoveOp, SetPropertyOp};

use super::{EncodedVertex, ScanOptions};

/// SQLite-backed `VertexStore` + `LogStore` implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<TokioMutex<Connection>>,
}

impl SqliteStorage {
    pub async fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(StorageError::Sqlite)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(TokioMutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS vertices (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                idx INTEGER,
                payload TEXT
            )",
            [],
        )
        .map_err(StorageError::Sqlite)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS vertices_parent_idx ON vertices(parent_id, idx)",
            [],
        )
        .map_err(StorageError::Sqlite)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS move_ops (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                peer_id TEXT NOT NULL,
                counter INTEGER NOT NULL,
                target_id TEXT NOT NULL,
                parent_id TEXT
            )",
            [],
        )
        .map_err(StorageError::Sqlite)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS prop_ops (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                peer_id TEXT NOT NULL,
                counter INTEGER NOT NULL,
                target_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT,
                transient INTEGER NOT NULL
            )",
            [],
        )
        .map_err(StorageError::Sqlite)?;
        Ok(())
    }
}

#[async_trait]
impl super::VertexStore for SqliteStorage {
    async fn get_vertex(&self, id: &str) -> Result<Option<EncodedVertex>> {
        let id = id.to_string();
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT parent_id, idx, payload FROM vertices WHERE id = ?",
            [&id],
            |row| {
                let parent_id: Option<String> = row.get(0)?;
                let idx: i64 = row.get(1)?;
                let payload: String = row.get(2)?;
                Ok((parent_id, idx, payload))
            },
        )
        .optional()
        .map_err(StorageError::Sqlite)?
        .map(|(parent_id, idx, payload)| {
            let properties = serde_json::from_str(&payload).map_err(Error::Serialization)?;
            Ok(EncodedVertex { id, parent_id, idx, properties })
        })
        .transpose()
    }

    async fn put_vertex(&self, vertex: EncodedVertex) -> Result<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(&vertex.properties)?;
        conn.execute(
            "INSERT OR REPLACE INTO vertices (id, parent_id, idx, payload) VALUES (?, ?, ?, ?)",
            params![vertex.id, vertex.parent_id, vertex.idx, payload],
        )
        .map_err(StorageError::Sqlite)?;
        Ok(())
    }

    async fn get_children_page(
        &self,
        parent_id: &str,
        after_cursor: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(VertexId, i64)>> {
        let conn = self.conn.lock().await;
        let mut stmt = if after_cursor.is_some() {
            conn.prepare("SELECT id, idx FROM vertices WHERE parent_id = ? AND idx > ? ORDER BY idx LIMIT ?")
        } else {
            conn.prepare("SELECT id, idx FROM vertices WHERE parent_id = ? ORDER BY idx LIMIT ?")
        }
        .map_err(StorageError::Sqlite)?;

        fn map_row(row: &rusqlite::Row) -> rusqlite::Result<(VertexId, i64)> {
            Ok((row.get(0)?, row.get(1)?))
        }

        let mut out = Vec::new();
        if let Some(after) = after_cursor {
            let rows = stmt
                .query_map(params![parent_id, after, limit as i64], map_row)
                .map_err(StorageError::Sqlite)?;
            for row in rows {
                out.push(row.map_err(StorageError::Sqlite)?);
            }
        } else {
            let rows = stmt
                .query_map(params![parent_id, limit as i64], map_row)
                .map_err(StorageError::Sqlite)?;
            for row in rows {
                out.push(row.map_err(StorageError::Sqlite)?);
            }
        }
        Ok(out)
    }
}

fn build_query(table: &str, columns: &str, opts: &ScanOptions) -> (String, Vec<String>) {
    let mut query = format!("SELECT {columns} FROM {table}");
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(peer_id) = &opts.peer_id {
        conditions.push("peer_id = ?".to_string());
        params.push(peer_id.clone());
    }
    if let Some(from) = opts.from_counter {
        conditions.push("counter >= ?".to_string());
        params.push(from.to_string());
    }
    if let Some(to) = opts.to_counter {
        conditions.push("counter <= ?".to_string());
        params.push(to.to_string());
    }
    if !conditions.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&conditions.join(" AND "));
    }
    query.push_str(" ORDER BY seq");
    if opts.reverse {
        query.push_str(" DESC");
    }
    if let Some(limit) = opts.limit {
        query.push_str(&format!(" LIMIT {limit}"));
    }
    (query, params)
}

#[async_trait]
impl super::LogStore<MoveOp> for SqliteStorage {
    async fn append(&self, op: MoveOp) -> Result<u64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO move_ops (peer_id, counter, target_id, parent_id) VALUES (?, ?, ?, ?)",
            params![op.id.peer_id, op.id.counter, op.target_id, op.parent_id],
        )
        .map_err(StorageError::Sqlite)?;
        Ok(conn.last_insert_rowid() as u64)
    }

    async fn latest_seq(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let seq: Option<i64> = conn
            .query_row("SELECT MAX(seq) FROM move_ops", [], |row| row.get(0))
            .optional()
            .map_err(StorageError::Sqlite)?;
        Ok(seq.unwrap_or(0) as u64)
    }

    async fn scan_range(&self, opts: ScanOptions) -> BoxStream<'_, Result<MoveOp>> {
        let (query, params) = build_query("move_ops", "peer_id, counter, target_id, parent_id", &opts);
        let conn = self.conn.clone();
        let stream = stream::once(async move {
            let conn_guard = conn.lock().await;
            let mut stmt = match conn_guard.prepare(&query) {
                Ok(s) => s,
                Err(e) => return stream::iter(vec![Err(StorageError::Sqlite(e).into())]),
            };
            let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(param_refs.as_slice(), |row| {
                let peer_id: String = row.get(0)?;
                let counter: i64 = row.get(1)?;
                let target_id: String = row.get(2)?;
                let parent_id: Option<String> = row.get(3)?;
                Ok(MoveOp { id: OpId::new(counter as u64, peer_id), target_id, parent_id })
            });
            let ops: Vec<Result<MoveOp>> = match rows {
                Ok(rows) => rows.map(|r| r.map_err(|e| StorageError::Sqlite(e).into())).collect(),
                Err(e) => vec![Err(StorageError::Sqlite(e).into())],
            };
            stream::iter(ops)
        })
        .flatten();
        Box::pin(stream)
    }
}

#[async_trait]
impl super::LogStore<SetPropertyOp> for SqliteStorage {
    async fn append(&self, op: SetPropertyOp) -> Result<u64> {
        let conn = self.conn.lock().await;
        let value = match &op.value {
            Some(v) => Some(serde_json::to_string(v)?),
            None => None,
        };
        conn.execute(
            "INSERT INTO prop_ops (peer_id, counter, target_id, key, value, transient) VALUES (?, ?, ?, ?, ?, ?)",
            params![op.id.peer_id, op.id.counter, op.target_id, op.key, value, op.transient as i64],
        )
        .map_err(StorageError::Sqlite)?;
        Ok(conn.last_insert_rowid() as u64)
    }

    async fn latest_seq(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let seq: Option<i64> = conn
            .query_row("SELECT MAX(seq) FROM prop_ops", [], |row| row.get(0))
            .optional()
            .map_err(StorageError::Sqlite)?;
        Ok(seq.unwrap_or(0) as u64)
    }

    async fn scan_range(&self, opts: ScanOptions) -> BoxStream<'_, Result<SetPropertyOp>> {
        let (query, params) = build_query("prop_ops", "peer_id, counter, target_id, key, value, transient", &opts);
        let conn = self.conn.clone();
        let stream = stream::once(async move {
            let conn_guard = conn.lock().await;
            let mut stmt = match conn_guard.prepare(&query) {
                Ok(s) => s,
                Err(e) => return stream::iter(vec![Err(StorageError::Sqlite(e).into())]),
            };
            let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(param_refs.as_slice(), |row| {
                let peer_id: String = row.get(0)?;
                let counter: i64 = row.get(1)?;
                let target_id: String = row.get(2)?;
                let key: String = row.get(3)?;
                let value_str: Option<String> = row.get(4)?;
                let transient: i64 = row.get(5)?;
                Ok((peer_id, counter, target_id, key, value_str, transient))
            });
            let ops: Vec<Result<SetPropertyOp>> = match rows {
                Ok(rows) => rows
                    .map(|r| {
                        let (peer_id, counter, target_id, key, value_str, transient) =
                            r.map_err(StorageError::Sqlite)?;
                        let value = value_str
                            .map(|s| serde_json::from_str(&s))
                            .transpose()
                            .map_err(Error::Serialization)?;
                        Ok(SetPropertyOp {
                            id: OpId::new(counter as u64, peer_id),
                            target_id,
                            key,
                            value,
                            transient: transient != 0,
                        })
                    })
                    .collect(),
                Err(e) => vec![Err(StorageError::Sqlite(e).into())],
            };
            stream::iter(ops)
        })
        .flatten();
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LogStore, VertexStore};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn round_trips_a_vertex() {
        let storage = SqliteStorage::new(":memory:").await.unwrap();
        let vertex = EncodedVertex {
            id: "v1".into(),
            parent_id: Some("root".into()),
            idx: 0,
            properties: BTreeMap::new(),
        };
        storage.put_vertex(vertex.clone()).await.unwrap();
        let fetched = storage.get_vertex("v1").await.unwrap().unwrap();
        assert_eq!(fetched, vertex);
    }

    #[tokio::test]
    async fn appends_and_scans_move_ops() {
        let storage = SqliteStorage::new(":memory:").await.unwrap();
        for counter in 0..5 {
            storage
                .append(MoveOp { id: OpId::new(counter, "p1"), target_id: format!("v{counter}"), parent_id: None })
                .await
                .unwrap();
        }
        let opts = ScanOptions { peer_id: Some("p1".into()), from_counter: Some(2), to_counter: Some(3), ..Default::default() };
        let ops: Vec<crate::error::Result<MoveOp>> = storage.scan_range(opts).await.collect().await;
        assert_eq!(ops.len(), 2);
    }
}
