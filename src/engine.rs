//! The core RepTree engine (§2 "Core engine", §4.1, §4.2, §5, §6).
//!
//! Single-threaded cooperative scheduling (§5): every public method here
//! runs to completion before returning, and any observer callbacks fire
//! synchronously inside the call that triggered them. Callers that need
//! to drive the engine from multiple threads must serialize access
//! themselves (a mutex or a task queue) — the engine does not do it for
//! them.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use lru::LruCache;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{Callback, ListenerId};
use crate::id::{LamportClock, OpId, PeerId, VertexId, MAX_SAFE_COUNTER};
use crate::op::{MoveOp, Op, SetPropertyOp};
use crate::pending::PendingQueues;
use crate::snapshot::{TreeState, DELETED_PARENT_SENTINEL};
use crate::state_vector::{Range, StateVector};
use crate::storage::{EncodedVertex, ScanOptions, Storage};
use crate::value::{self, Value};

/// Read-only view of a vertex handed back to callers (§6 `get_vertex`).
#[derive(Debug, Clone, PartialEq)]
pub struct VertexView {
    pub id: VertexId,
    pub parent_id: Option<VertexId>,
    pub properties: BTreeMap<String, Value>,
}

/// Outcome a `transact` closure returns to tell the engine whether to
/// keep or unwind the edits it made (§5, §9 REDESIGN FLAGS: an explicit
/// result replaces the source's exception-based abort).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Commit,
    Abort,
}

const DEFAULT_VERTEX_CACHE_SIZE: usize = 50_000;

struct TxJournal {
    move_ids: Vec<OpId>,
    prop_prior: HashMap<(VertexId, String), Option<(Value, OpId)>>,
    staged_ops: Vec<Op>,
    sv_snapshot: StateVector,
    move_log_len: usize,
    prop_log_len: usize,
}

/// The replicated tree CRDT engine for one replica.
pub struct RepTree {
    peer_id: PeerId,
    clock: LamportClock,
    tree: TreeState,
    move_log: Vec<MoveOp>,
    prop_log: Vec<SetPropertyOp>,
    pending: PendingQueues,
    state_vector: StateVector,
    parent_before_move: HashMap<OpId, Option<VertexId>>,
    existed_before_move: HashMap<OpId, bool>,
    outgoing: Vec<Op>,
    op_listeners: Vec<Box<dyn FnMut(&Op) + Send>>,
    tx: Option<TxJournal>,
    /// External op-store bridge (§4.5). `None` means the engine is
    /// purely in-memory; the `*_async` helpers then just defer to the
    /// synchronous path.
    store: Option<Arc<Storage>>,
    op_memory_limit: Option<usize>,
    /// Highest counter evicted to the store, per peer. Ranges at or
    /// below this are no longer resident in `move_log`/`prop_log` and
    /// must be served from `store` (§4.5 windowing).
    evicted_before: HashMap<PeerId, u64>,
    /// Read-through cache for vertices fetched from `store` (§4.5). Only
    /// consulted by the `*_async` helpers; never by the synchronous path.
    vertex_cache: Mutex<LruCache<VertexId, EncodedVertex>>,
}

impl RepTree {
    /// New replica for `peer_id`, optionally seeded with an existing op
    /// history (e.g. loaded from disk).
    pub fn new(peer_id: impl Into<PeerId>, initial_ops: Option<Vec<Op>>) -> Result<Self> {
        let mut engine = Self {
            peer_id: peer_id.into(),
            clock: LamportClock::new(),
            tree: TreeState::new(),
            move_log: Vec::new(),
            prop_log: Vec::new(),
            pending: PendingQueues::new(),
            state_vector: StateVector::new(),
            parent_before_move: HashMap::new(),
            existed_before_move: HashMap::new(),
            outgoing: Vec::new(),
            op_listeners: Vec::new(),
            tx: None,
            store: None,
            op_memory_limit: None,
            evicted_before: HashMap::new(),
            vertex_cache: Mutex::new(LruCache::new(NonZeroUsize::new(DEFAULT_VERTEX_CACHE_SIZE).unwrap())),
        };
        if let Some(ops) = initial_ops {
            engine.merge(ops)?;
            engine.outgoing.clear();
        }
        Ok(engine)
    }

    pub fn with_store(mut self, store: Arc<Storage>, op_memory_limit: Option<usize>) -> Self {
        self.store = Some(store);
        self.op_memory_limit = op_memory_limit;
        self
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Returns a new engine for `new_peer_id`, seeded with every op this
    /// replica has applied (§6 `replicate`).
    pub fn replicate(&self, new_peer_id: impl Into<PeerId>) -> Result<Self> {
        Self::new(new_peer_id, Some(self.get_all_ops()))
    }

    // ---- local edits -----------------------------------------------

    pub fn create_root(&mut self) -> Result<VertexId> {
        if self.tree.root_id().is_some() {
            return Err(Error::RootAlreadyExists);
        }
        let id = Uuid::new_v4().to_string();
        let op_id = self.clock.tick(&self.peer_id);
        self.apply_move(MoveOp { id: op_id, target_id: id.clone(), parent_id: None }, true)?;
        self.tree.set_root_id(id.clone());
        Ok(id)
    }

    pub fn new_vertex(&mut self, parent_id: &str, props: &[(&str, Value)]) -> Result<VertexId> {
        if !self.tree.contains(parent_id) && parent_id != DELETED_PARENT_SENTINEL {
            return Err(Error::VertexNotFound(parent_id.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        let op_id = self.clock.tick(&self.peer_id);
        self.apply_move(
            MoveOp { id: op_id, target_id: id.clone(), parent_id: Some(parent_id.to_string()) },
            true,
        )?;
        for (key, value) in props {
            self.set_property(&id, key, value.clone())?;
        }
        Ok(id)
    }

    pub fn new_named_vertex(&mut self, parent_id: &str, name: &str) -> Result<VertexId> {
        self.new_vertex(parent_id, &[("name", Value::from(name))])
    }

    pub fn move_vertex(&mut self, vertex_id: &str, parent_id: Option<&str>) -> Result<()> {
        let op_id = self.clock.tick(&self.peer_id);
        self.apply_move(
            MoveOp { id: op_id, target_id: vertex_id.to_string(), parent_id: parent_id.map(str::to_string) },
            true,
        )
    }

    pub fn delete(&mut self, vertex_id: &str) -> Result<()> {
        self.move_vertex(vertex_id, Some(DELETED_PARENT_SENTINEL))
    }

    pub fn set_property(&mut self, vertex_id: &str, key: &str, value: Value) -> Result<()> {
        value::validate_property(key, &value)?;
        let op_id = self.clock.tick(&self.peer_id);
        self.apply_property(
            SetPropertyOp { id: op_id, target_id: vertex_id.to_string(), key: key.to_string(), value: Some(value), transient: false },
            true,
        )
    }

    pub fn remove_property(&mut self, vertex_id: &str, key: &str) -> Result<()> {
        let op_id = self.clock.tick(&self.peer_id);
        self.apply_property(
            SetPropertyOp { id: op_id, target_id: vertex_id.to_string(), key: key.to_string(), value: None, transient: false },
            true,
        )
    }

    pub fn set_transient(&mut self, vertex_id: &str, key: &str, value: Value) -> Result<()> {
        value::validate_property(key, &value)?;
        let op_id = self.clock.tick(&self.peer_id);
        self.apply_property(
            SetPropertyOp { id: op_id, target_id: vertex_id.to_string(), key: key.to_string(), value: Some(value), transient: true },
            true,
        )
    }

    /// Promote every transient entry currently set on `vertex_id` to a
    /// persistent `SetProperty` op (§4.2).
    pub fn commit_transients(&mut self, vertex_id: &str) -> Result<()> {
        let transient = self.tree.get_properties(vertex_id, true);
        let persistent = self.tree.get_properties(vertex_id, false);
        for (key, value) in transient {
            if persistent.get(&key) != Some(&value) {
                self.set_property(vertex_id, &key, value)?;
            }
        }
        Ok(())
    }

    /// Run `f` with this engine; keep its edits if it returns `Commit`,
    /// unwind them if it returns `Abort` (§5). Local-only: aborted ops
    /// never reach `pop_local_ops`/`get_all_ops`.
    pub fn transact<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut RepTree) -> TxOutcome,
    {
        self.tx = Some(TxJournal {
            move_ids: Vec::new(),
            prop_prior: HashMap::new(),
            staged_ops: Vec::new(),
            sv_snapshot: self.state_vector.clone(),
            move_log_len: self.move_log.len(),
            prop_log_len: self.prop_log.len(),
        });
        let outcome = f(self);
        let journal = self.tx.take().expect("transaction journal disappeared");
        match outcome {
            TxOutcome::Commit => {
                self.outgoing.extend(journal.staged_ops);
            }
            TxOutcome::Abort => {
                for op_id in journal.move_ids.into_iter().rev() {
                    if let Some(mv) = self.move_log.iter().find(|m| m.id == op_id).cloned() {
                        let prior = self.parent_before_move.remove(&op_id).flatten();
                        let existed = self.existed_before_move.remove(&op_id).unwrap_or(true);
                        if existed {
                            self.tree.set_parent(&mv.target_id, prior);
                        } else {
                            self.tree.remove_vertex(&mv.target_id);
                        }
                    }
                }
                self.move_log.truncate(journal.move_log_len);
                self.prop_log.truncate(journal.prop_log_len);
                for ((target, key), prior) in journal.prop_prior {
                    self.tree.restore_property(&target, &key, prior);
                }
                self.state_vector = journal.sv_snapshot;
            }
        }
        Ok(())
    }

    // ---- internal apply path (§4.1, §4.2) ---------------------------

    fn apply_move(&mut self, op: MoveOp, local: bool) -> Result<()> {
        if op.id.counter > MAX_SAFE_COUNTER {
            return Err(Error::CounterOutOfRange(op.id.counter));
        }
        if self.state_vector.contains(&op.id) {
            log::debug!("duplicate move op ignored: {:?}", op.id);
            return Ok(());
        }
        if let Some(parent_id) = &op.parent_id {
            if parent_id != DELETED_PARENT_SENTINEL && !self.tree.contains(parent_id) {
                log::debug!("parking move {:?}: parent {parent_id} not yet known", op.id);
                self.pending.park_move(parent_id.clone(), op);
                return Ok(());
            }
        }
        self.clock.observe(op.id.counter);
        let target = op.target_id.clone();
        self.apply_move_sorted(op.clone());
        self.state_vector.update(&op.id);
        self.notify_op_applied(&Op::Move(op.clone()));

        if local {
            match &mut self.tx {
                Some(tx) => {
                    tx.move_ids.push(op.id.clone());
                    tx.staged_ops.push(Op::Move(op));
                }
                None => self.outgoing.push(Op::Move(op)),
            }
        }

        let queued_props = self.pending.drain_properties(&target);
        for p in queued_props {
            self.apply_property(p, false)?;
        }
        let queued_moves = self.pending.drain_moves(&target);
        for m in queued_moves {
            self.apply_move(m, false)?;
        }
        Ok(())
    }

    /// Insert `op` into the ascending-by-OpId move log, undoing and
    /// redoing whatever newer ops sit past its insertion point (§4.1
    /// steps 3-5). Grounded directly on the Kleppmann do/undo/redo
    /// recursion (`State::apply_op` in the reference tree CRDT).
    fn apply_move_sorted(&mut self, op: MoveOp) {
        match self.move_log.last() {
            None => {
                self.try_move(&op);
                self.move_log.push(op);
            }
            Some(last) if op.id > last.id => {
                self.try_move(&op);
                self.move_log.push(op);
            }
            Some(last) if op.id == last.id => {
                log::warn!("two ops shared OpId {:?}; ignoring the later one", op.id);
            }
            Some(_) => {
                let newer = self.move_log.pop().unwrap();
                self.undo_move(&newer);
                self.apply_move_sorted(op);
                self.try_move(&newer);
                self.move_log.push(newer);
            }
        }
    }

    fn try_move(&mut self, op: &MoveOp) {
        let existed = self.tree.contains(&op.target_id);
        let old_parent = self.tree.parent_of(&op.target_id);
        self.parent_before_move.insert(op.id.clone(), old_parent);
        self.existed_before_move.insert(op.id.clone(), existed);

        if let Some(parent_id) = &op.parent_id {
            if parent_id == &op.target_id {
                return;
            }
            if parent_id != DELETED_PARENT_SENTINEL && self.tree.is_ancestor(parent_id, &op.target_id) {
                log::warn!("refusing cycle-inducing move of {} under {}", op.target_id, parent_id);
                return;
            }
        }
        self.tree.set_parent(&op.target_id, op.parent_id.clone());

        // A Move to root level (parent `None`) designates the root (§3),
        // whether it arrived via `create_root` or via `merge`/`replicate`.
        if op.parent_id.is_none() && op.target_id != DELETED_PARENT_SENTINEL && self.tree.root_id().is_none() {
            self.tree.set_root_id(op.target_id.clone());
        }
    }

    fn undo_move(&mut self, op: &MoveOp) {
        let existed = *self.existed_before_move.get(&op.id).unwrap_or(&true);
        let prior = self.parent_before_move.get(&op.id).cloned().flatten();
        if existed {
            self.tree.set_parent(&op.target_id, prior);
        } else {
            self.tree.remove_vertex(&op.target_id);
        }
    }

    fn apply_property(&mut self, op: SetPropertyOp, local: bool) -> Result<()> {
        if op.id.counter > MAX_SAFE_COUNTER {
            return Err(Error::CounterOutOfRange(op.id.counter));
        }
        if self.state_vector.contains(&op.id) {
            log::debug!("duplicate property op ignored: {:?}", op.id);
            return Ok(());
        }
        if !self.tree.contains(&op.target_id) {
            if op.transient {
                log::debug!("discarding transient write to unknown vertex {}", op.target_id);
                return Ok(());
            }
            log::debug!("parking property write {:?}: target {} not yet known", op.id, op.target_id);
            self.pending.park_property(op.target_id.clone(), op);
            return Ok(());
        }

        self.clock.observe(op.id.counter);

        if op.transient {
            let last = self.tree.last_transient_op(&op.target_id, &op.key).cloned();
            if last.is_none_or_id_lt(&op.id) {
                self.tree.write_transient(&op.target_id, &op.key, op.value.clone().unwrap_or(Value::Null), op.id.clone());
            }
            // Transients are never logged or transmitted (§8 "Transient
            // isolation"), so they must not occupy a state-vector slot —
            // doing so would make two replicas that share the same
            // persistent ops report different state vectors.
            self.notify_op_applied(&Op::Set(op));
            return Ok(());
        }

        let prior = self.tree.get(&op.target_id).and_then(|v| v.properties.get(&op.key).cloned());
        self.prop_log.push(op.clone());
        let last_persistent = self.tree.last_property_op(&op.target_id, &op.key).cloned();
        if last_persistent.is_none_or_id_lt(&op.id) {
            self.tree.write_property(&op.target_id, &op.key, op.value.clone(), op.id.clone());
        }
        self.state_vector.update(&op.id);
        self.notify_op_applied(&Op::Set(op.clone()));

        if local {
            match &mut self.tx {
                Some(tx) => {
                    tx.prop_prior.entry((op.target_id.clone(), op.key.clone())).or_insert(prior);
                    tx.staged_ops.push(Op::Set(op));
                }
                None => self.outgoing.push(Op::Set(op)),
            }
        }
        Ok(())
    }

    fn notify_op_applied(&mut self, op: &Op) {
        for cb in &mut self.op_listeners {
            cb(op);
        }
    }

    // ---- reads -------------------------------------------------------

    pub fn get_vertex(&self, id: &str) -> Option<VertexView> {
        let v = self.tree.get(id)?;
        Some(VertexView {
            id: id.to_string(),
            parent_id: v.parent_id.clone(),
            properties: self.tree.get_properties(id, true),
        })
    }

    pub fn get_all_vertices(&self) -> Vec<VertexId> {
        self.tree.all_ids().filter(|id| id.as_str() != DELETED_PARENT_SENTINEL).cloned().collect()
    }

    pub fn get_children_ids(&self, parent_id: &str) -> Vec<VertexId> {
        self.tree.children_ids(parent_id)
    }

    pub fn get_children(&self, parent_id: &str) -> Vec<VertexView> {
        self.get_children_ids(parent_id).into_iter().filter_map(|id| self.get_vertex(&id)).collect()
    }

    pub fn get_parent(&self, id: &str) -> Option<VertexId> {
        self.tree.parent_of(id)
    }

    pub fn get_ancestors(&self, id: &str) -> Vec<VertexId> {
        self.tree.ancestors(id)
    }

    pub fn get_vertex_by_path(&self, path: &str) -> Option<VertexId> {
        let root = self.tree.root_id()?;
        self.tree.resolve_path(root, path)
    }

    pub fn get_property(&self, id: &str, key: &str) -> Option<Value> {
        self.get_property_opt(id, key, true)
    }

    pub fn get_property_opt(&self, id: &str, key: &str, include_transient: bool) -> Option<Value> {
        self.tree.get_property(id, key, include_transient)
    }

    pub fn get_properties(&self, id: &str) -> BTreeMap<String, Value> {
        self.tree.get_properties(id, true)
    }

    pub fn is_ancestor(&self, child_id: &str, ancestor_id: &str) -> bool {
        self.tree.is_ancestor(child_id, ancestor_id)
    }

    // ---- ops & sync (§4.3, §6) ---------------------------------------

    /// Every persistent op applied, sorted by OpId. Transient writes
    /// never appear here (§8 "Transient isolation").
    pub fn get_all_ops(&self) -> Vec<Op> {
        let mut ops: Vec<Op> = self.move_log.iter().cloned().map(Op::Move)
            .chain(self.prop_log.iter().cloned().map(Op::Set))
            .collect();
        ops.sort_by(|a, b| a.id().cmp(b.id()));
        ops
    }

    /// Drain and return ops issued locally since the last call (§6).
    pub fn pop_local_ops(&mut self) -> Vec<Op> {
        std::mem::take(&mut self.outgoing)
    }

    /// Apply a batch of ops, local or remote. Idempotent for OpIds
    /// already applied.
    pub fn merge(&mut self, ops: Vec<Op>) -> Result<()> {
        for op in ops {
            match op {
                Op::Move(m) => self.apply_move(m, false)?,
                Op::Set(s) => self.apply_property(s, false)?,
            }
        }
        Ok(())
    }

    pub fn get_state_vector(&self) -> BTreeMap<PeerId, Vec<Range>> {
        self.state_vector.to_ranges()
    }

    /// The minimal set of ops this replica must send a peer whose state
    /// vector is `their_sv` (§4.3).
    pub fn get_missing_ops(&self, their_sv: &BTreeMap<PeerId, Vec<Range>>) -> Vec<Op> {
        let their = StateVector::from_ranges(their_sv.clone());
        let missing = self.state_vector.diff(&their);
        let mut out = Vec::new();
        for (peer, range) in &missing {
            out.extend(
                self.move_log.iter()
                    .filter(|m| m.id.peer_id == *peer && m.id.counter >= range.lo && m.id.counter <= range.hi)
                    .cloned()
                    .map(Op::Move),
            );
            out.extend(
                self.prop_log.iter()
                    .filter(|p| p.id.peer_id == *peer && p.id.counter >= range.lo && p.id.counter <= range.hi)
                    .cloned()
                    .map(Op::Set),
            );
        }
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    // ---- structural comparison (§6) -----------------------------------

    pub fn compare_structure(&self, other: &RepTree) -> bool {
        self.tree.compare_structure(&other.tree)
    }

    pub fn compare_move_ops(&self, other: &RepTree) -> bool {
        self.get_all_ops().into_iter().filter(|o| matches!(o, Op::Move(_))).eq(
            other.get_all_ops().into_iter().filter(|o| matches!(o, Op::Move(_))),
        )
    }

    // ---- observers (§4.4, §6) ------------------------------------------

    pub fn observe(&mut self, vertex_id: &str, cb: Callback) -> ListenerId {
        self.tree.observe_vertex(vertex_id, cb)
    }

    pub fn observe_vertex_move(&mut self, cb: Callback) -> ListenerId {
        self.tree.observe_all(cb)
    }

    pub fn observe_op_applied<F>(&mut self, cb: F)
    where
        F: FnMut(&Op) + Send + 'static,
    {
        self.op_listeners.push(Box::new(cb));
    }

    pub fn dispose_listener(&mut self, id: ListenerId) {
        self.tree.dispose_listener(id);
    }

    pub fn pending_move_count(&self) -> usize {
        self.pending.pending_move_count()
    }

    pub fn pending_property_count(&self) -> usize {
        self.pending.pending_property_count()
    }

    pub fn op_memory_limit(&self) -> Option<usize> {
        self.op_memory_limit
    }

    pub fn store(&self) -> Option<&Arc<Storage>> {
        self.store.as_ref()
    }

    // ---- async op-store bridge (§4.5) ---------------------------------
    //
    // Every method below is the only part of this engine allowed to
    // `.await`. None of them run as a side effect of the synchronous
    // methods above; a caller opts in by calling them explicitly.

    /// Write `id`'s current snapshot row to the store, if one is
    /// attached. A no-op when the engine has no store.
    pub async fn persist_vertex(&self, id: &str) -> Result<()> {
        let Some(store) = &self.store else { return Ok(()) };
        self.persist_vertex_to(store, id).await
    }

    async fn persist_vertex_to(&self, store: &Storage, id: &str) -> Result<()> {
        let Some(view) = self.get_vertex(id) else { return Ok(()) };
        let idx = view
            .parent_id
            .as_ref()
            .map(|p| self.tree.children_ids(p).iter().position(|c| c == id).unwrap_or(0) as i64)
            .unwrap_or(0);
        let encoded = EncodedVertex { id: view.id, parent_id: view.parent_id, idx, properties: view.properties };
        store.vertices.put_vertex(encoded.clone()).await?;
        self.vertex_cache.lock().unwrap().put(id.to_string(), encoded);
        Ok(())
    }

    /// Read a vertex that may have been evicted from memory: checks the
    /// live tree, then the read-through cache, then falls back to the
    /// store (§4.5 "cache-then-store-fallback").
    pub async fn get_vertex_async(&self, id: &str) -> Result<Option<VertexView>> {
        if let Some(view) = self.get_vertex(id) {
            return Ok(Some(view));
        }
        let Some(store) = &self.store else { return Ok(None) };
        if let Some(cached) = self.vertex_cache.lock().unwrap().get(id).cloned() {
            return Ok(Some(VertexView { id: cached.id, parent_id: cached.parent_id, properties: cached.properties }));
        }
        let Some(encoded) = store.vertices.get_vertex(id).await? else { return Ok(None) };
        self.vertex_cache.lock().unwrap().put(id.to_string(), encoded.clone());
        Ok(Some(VertexView { id: encoded.id, parent_id: encoded.parent_id, properties: encoded.properties }))
    }

    /// Enumerate `parent_id`'s children a page at a time, consulting the
    /// store for rows evicted from memory (§8 "paged child enumeration").
    /// Falls back to the in-memory children list when no store is
    /// attached.
    pub async fn get_children_ids_async(
        &self,
        parent_id: &str,
        after_cursor: Option<i64>,
        limit: usize,
    ) -> Result<Vec<VertexId>> {
        let mut out = self.tree.children_ids(parent_id);
        if let Some(store) = &self.store {
            for (id, _) in store.vertices.get_children_page(parent_id, after_cursor, limit).await? {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        out.truncate(limit);
        Ok(out)
    }

    /// Like `get_missing_ops`, but also consults the store for ranges
    /// that have been evicted from the in-memory logs.
    pub async fn get_missing_ops_async(&self, their_sv: &BTreeMap<PeerId, Vec<Range>>) -> Result<Vec<Op>> {
        let mut out = self.get_missing_ops(their_sv);
        if let Some(store) = &self.store {
            let their = StateVector::from_ranges(their_sv.clone());
            for (peer, range) in self.state_vector.diff(&their) {
                let evicted_to = self.evicted_before.get(&peer).copied().unwrap_or(0);
                if range.lo > evicted_to {
                    continue;
                }
                let scan_hi = range.hi.min(evicted_to);
                let opts = ScanOptions {
                    peer_id: Some(peer.clone()),
                    from_counter: Some(range.lo),
                    to_counter: Some(scan_hi),
                    ..Default::default()
                };
                let mut found = 0u64;
                let mut moves = store.move_log.scan_range(opts.clone()).await;
                while let Some(op) = moves.next().await {
                    out.push(Op::Move(op?));
                    found += 1;
                }
                let mut props = store.prop_log.scan_range(opts).await;
                while let Some(op) = props.next().await {
                    out.push(Op::Set(op?));
                    found += 1;
                }
                // The store must account for every counter in the evicted
                // portion of the diff; a short read means that range was
                // pruned and is gone for good.
                let expected = scan_hi - range.lo + 1;
                if found != expected {
                    return Err(Error::PrunedHistory { peer, lo: range.lo, hi: range.hi });
                }
            }
            out.sort_by(|a, b| a.id().cmp(b.id()));
            out.dedup_by(|a, b| a.id() == b.id());
        }
        Ok(out)
    }

    /// Move the oldest resident ops to the store once the in-memory logs
    /// exceed `op_memory_limit`, keeping exactly `op_memory_limit` ops
    /// resident. A no-op without both a store and a configured limit.
    /// This approximates causal stability by age rather than by
    /// tracking every peer's acknowledged state vector, which this
    /// engine does not otherwise retain.
    pub async fn persist_and_evict(&mut self) -> Result<()> {
        let Some(store) = self.store.clone() else { return Ok(()) };
        let Some(limit) = self.op_memory_limit else { return Ok(()) };
        let total = self.move_log.len() + self.prop_log.len();
        if total <= limit {
            return Ok(());
        }
        let overflow = total - limit;
        let mut ops = self.get_all_ops();
        for op in ops.drain(..overflow.min(ops.len())) {
            let id = op.id().clone();
            match &op {
                Op::Move(m) => {
                    store.move_log.append(m.clone()).await?;
                    self.persist_vertex_to(&store, &m.target_id).await?;
                    self.move_log.retain(|x| x.id != m.id);
                }
                Op::Set(s) => {
                    store.prop_log.append(s.clone()).await?;
                    self.prop_log.retain(|x| x.id != s.id);
                }
            }
            self.evicted_before
                .entry(id.peer_id.clone())
                .and_modify(|c| *c = (*c).max(id.counter))
                .or_insert(id.counter);
        }
        Ok(())
    }
}

/// Small helper so the "no prior op, or prior op older" comparison in
/// §4.1/§4.2 reads the same way at every call site.
trait OlderThan {
    fn is_none_or_id_lt(&self, id: &OpId) -> bool;
}

impl OlderThan for Option<OpId> {
    fn is_none_or_id_lt(&self, id: &OpId) -> bool {
        match self {
            None => true,
            Some(prior) => prior < id,
        }
    }
}
