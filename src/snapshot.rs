//! The materialized tree (§2 "Snapshot (TreeState)", §3, §4.4).
//!
//! Holds, for every known vertex, its parent pointer, its persistent and
//! transient property overlays, and a secondary children index rebuilt
//! from parent pointers (the "arena + id map" design called for in
//! §9 REDESIGN FLAGS — ids are opaque strings rather than interned
//! integers, but there is no ownership cycle: every edge is an id
//! indirection through this map).

use std::collections::{BTreeMap, HashMap};

use crate::events::{Callback, Event, ListenerId, Listeners};
use crate::id::{OpId, VertexId};
use crate::value::Value;

/// The conventional tombstone parent used by `delete` (§3).
pub const DELETED_PARENT_SENTINEL: &str = "0";

#[derive(Debug, Clone, Default)]
pub struct Vertex {
    pub parent_id: Option<VertexId>,
    pub properties: BTreeMap<String, (Value, OpId)>,
    pub transient: BTreeMap<String, (Value, OpId)>,
}

#[derive(Default)]
pub struct TreeState {
    vertices: HashMap<VertexId, Vertex>,
    /// parent_id -> ordered list of children (first-became-a-child order).
    children_index: HashMap<VertexId, Vec<VertexId>>,
    root_id: Option<VertexId>,
    listeners: Listeners,
}

impl TreeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_id(&self) -> Option<&VertexId> {
        self.root_id.as_ref()
    }

    pub fn set_root_id(&mut self, id: VertexId) {
        self.root_id = Some(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    pub fn all_ids(&self) -> impl Iterator<Item = &VertexId> {
        self.vertices.keys()
    }

    /// Parent pointer for `id`, or `None` if `id` is unknown or
    /// root-level.
    pub fn parent_of(&self, id: &str) -> Option<VertexId> {
        self.vertices.get(id).and_then(|v| v.parent_id.clone())
    }

    fn children_of(&self, parent_id: &str) -> &[VertexId] {
        self.children_index.get(parent_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children_ids(&self, parent_id: &str) -> Vec<VertexId> {
        self.children_of(parent_id).to_vec()
    }

    fn detach_from_parent(&mut self, child_id: &str, parent_id: &str) {
        if let Some(children) = self.children_index.get_mut(parent_id) {
            children.retain(|c| c != child_id);
            if children.is_empty() {
                self.children_index.remove(parent_id);
            }
        }
    }

    fn attach_to_parent(&mut self, child_id: &str, parent_id: &str) {
        let children = self.children_index.entry(parent_id.to_string()).or_default();
        if !children.iter().any(|c| c == child_id) {
            children.push(child_id.to_string());
        }
    }

    /// Write `target_id`'s parent pointer, creating the vertex if it is
    /// new, updating the children index, and emitting `Move`/`Children`
    /// events. Returns the prior parent (`None` means the vertex didn't
    /// exist before this call).
    pub fn set_parent(&mut self, target_id: &str, new_parent: Option<VertexId>) -> Option<VertexId> {
        let existed = self.vertices.contains_key(target_id);
        let old_parent = if existed {
            self.vertices.get(target_id).unwrap().parent_id.clone()
        } else {
            None
        };

        if let Some(old) = &old_parent {
            self.detach_from_parent(target_id, old);
        }
        if let Some(new) = &new_parent {
            self.attach_to_parent(target_id, new);
        }

        let entry = self.vertices.entry(target_id.to_string()).or_default();
        entry.parent_id = new_parent.clone();

        self.listeners.dispatch(&Event::Move {
            vertex_id: target_id.to_string(),
            old_parent_id: old_parent.clone(),
            new_parent_id: new_parent.clone(),
        });
        if let Some(old) = &old_parent {
            self.listeners.dispatch(&Event::Children { parent_id: old.clone(), children: self.children_ids(old) });
        }
        if let Some(new) = &new_parent {
            self.listeners.dispatch(&Event::Children { parent_id: new.clone(), children: self.children_ids(new) });
        }

        if existed { old_parent } else { None }
    }

    /// Remove `target_id` entirely (used only by undo when the target
    /// did not exist prior to the undone move, §4.1 step 5).
    pub fn remove_vertex(&mut self, target_id: &str) {
        if let Some(v) = self.vertices.remove(target_id) {
            if let Some(parent) = &v.parent_id {
                self.detach_from_parent(target_id, parent);
            }
        }
        self.children_index.remove(target_id);
    }

    pub fn write_property(&mut self, target_id: &str, key: &str, value: Option<Value>, op_id: OpId) {
        let entry = self.vertices.entry(target_id.to_string()).or_default();
        match &value {
            Some(v) => { entry.properties.insert(key.to_string(), (v.clone(), op_id.clone())); }
            None => { entry.properties.remove(key); }
        }
        entry.transient.remove(key);
        self.listeners.dispatch(&Event::Property { vertex_id: target_id.to_string(), key: key.to_string(), value });
    }

    /// Directly set (or clear) a persistent property slot without going
    /// through the LWW comparison — used only to unwind an aborted
    /// transaction back to its pre-transaction value (§5).
    pub fn restore_property(&mut self, target_id: &str, key: &str, prior: Option<(Value, OpId)>) {
        let entry = self.vertices.entry(target_id.to_string()).or_default();
        let value = match prior {
            Some((value, op_id)) => {
                entry.properties.insert(key.to_string(), (value.clone(), op_id));
                Some(value)
            }
            None => {
                entry.properties.remove(key);
                None
            }
        };
        self.listeners.dispatch(&Event::Property { vertex_id: target_id.to_string(), key: key.to_string(), value });
    }

    pub fn write_transient(&mut self, target_id: &str, key: &str, value: Value, op_id: OpId) {
        let entry = self.vertices.entry(target_id.to_string()).or_default();
        entry.transient.insert(key.to_string(), (value.clone(), op_id));
        self.listeners.dispatch(&Event::Property { vertex_id: target_id.to_string(), key: key.to_string(), value: Some(value) });
    }

    pub fn clear_transient(&mut self, target_id: &str, key: &str) {
        if let Some(v) = self.vertices.get_mut(target_id) {
            v.transient.remove(key);
        }
    }

    pub fn last_property_op(&self, target_id: &str, key: &str) -> Option<&OpId> {
        self.vertices.get(target_id).and_then(|v| v.properties.get(key)).map(|(_, id)| id)
    }

    pub fn last_transient_op(&self, target_id: &str, key: &str) -> Option<&OpId> {
        self.vertices.get(target_id).and_then(|v| v.transient.get(key)).map(|(_, id)| id)
    }

    pub fn get_property(&self, target_id: &str, key: &str, include_transient: bool) -> Option<Value> {
        let v = self.vertices.get(target_id)?;
        if include_transient {
            if let Some((val, _)) = v.transient.get(key) {
                return Some(val.clone());
            }
        }
        v.properties.get(key).map(|(val, _)| val.clone())
    }

    pub fn get_properties(&self, target_id: &str, include_transient: bool) -> BTreeMap<String, Value> {
        let Some(v) = self.vertices.get(target_id) else { return BTreeMap::new() };
        let mut out: BTreeMap<String, Value> = v.properties.iter().map(|(k, (val, _))| (k.clone(), val.clone())).collect();
        if include_transient {
            for (k, (val, _)) in &v.transient {
                out.insert(k.clone(), val.clone());
            }
        }
        out
    }

    /// True if `ancestor_id` appears on `child_id`'s parent chain.
    /// A cycle encountered mid-walk is treated as "not an ancestor"
    /// (§4.1: refuses the offending move instead of looping forever).
    pub fn is_ancestor(&self, child_id: &str, ancestor_id: &str) -> bool {
        let mut seen = std::collections::HashSet::new();
        let mut current = child_id.to_string();
        while let Some(parent) = self.parent_of(&current) {
            if parent == ancestor_id {
                return true;
            }
            if !seen.insert(parent.clone()) {
                log::warn!("cycle detected while walking ancestors of {child_id}");
                return false;
            }
            current = parent;
        }
        false
    }

    /// Parent chain from `id` up to (but not including) the root or the
    /// deleted-parent sentinel.
    pub fn ancestors(&self, id: &str) -> Vec<VertexId> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut current = id.to_string();
        while let Some(parent) = self.parent_of(&current) {
            if !seen.insert(parent.clone()) {
                break;
            }
            out.push(parent.clone());
            current = parent;
        }
        out
    }

    /// Resolve a `/`-separated path of `name` properties starting at
    /// `root_id` (§6 `get_vertex_by_path`).
    pub fn resolve_path(&self, root_id: &str, path: &str) -> Option<VertexId> {
        let mut current = root_id.to_string();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let child = self.children_of(&current).iter().find(|c| {
                self.get_property(c, "name", true).as_ref().and_then(Value::as_str) == Some(segment)
            })?;
            current = child.clone();
        }
        Some(current)
    }

    /// Structural equality (§3 invariant 5): same root id, and the
    /// recursive `{parent, children set, property set}` matches.
    pub fn compare_structure(&self, other: &TreeState) -> bool {
        match (&self.root_id, &other.root_id) {
            (Some(a), Some(b)) if a == b => {}
            (None, None) => return true,
            _ => return false,
        }
        let root = self.root_id.clone().unwrap();
        self.compare_subtree(&root, other)
    }

    fn compare_subtree(&self, id: &str, other: &TreeState) -> bool {
        let a = self.get(id);
        let b = other.get(id);
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if a.parent_id != b.parent_id || a.properties != b.properties {
                    return false;
                }
                let mut my_children = self.children_ids(id);
                let mut their_children = other.children_ids(id);
                my_children.sort();
                their_children.sort();
                if my_children != their_children {
                    return false;
                }
                my_children.iter().all(|c| self.compare_subtree(c, other))
            }
            _ => false,
        }
    }

    pub fn observe_all(&mut self, cb: Callback) -> ListenerId {
        self.listeners.observe_all(cb)
    }

    pub fn observe_vertex(&mut self, vertex_id: &str, cb: Callback) -> ListenerId {
        self.listeners.observe_vertex(vertex_id, cb)
    }

    pub fn dispose_listener(&mut self, id: ListenerId) {
        self.listeners.dispose(id);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_parent_updates_children_index() {
        let mut t = TreeState::new();
        t.set_parent("a", None);
        t.set_parent("b", Some("a".into()));
        assert_eq!(t.children_ids("a"), vec!["b".to_string()]);
        t.set_parent("b", None);
        assert!(t.children_ids("a").is_empty());
    }

    #[test]
    fn is_ancestor_walks_parent_chain() {
        let mut t = TreeState::new();
        t.set_parent("root", None);
        t.set_parent("a", Some("root".into()));
        t.set_parent("b", Some("a".into()));
        assert!(t.is_ancestor("b", "root"));
        assert!(!t.is_ancestor("root", "b"));
    }

    #[test]
    fn resolve_path_walks_names() {
        let mut t = TreeState::new();
        t.set_parent("root", None);
        t.set_parent("docs", Some("root".into()));
        t.write_property("docs", "name", Some(Value::from("Docs")), OpId::new(0, "p1"));
        t.set_parent("readme", Some("docs".into()));
        t.write_property("readme", "name", Some(Value::from("README.md")), OpId::new(1, "p1"));
        assert_eq!(t.resolve_path("root", "Docs/README.md"), Some("readme".to_string()));
        assert_eq!(t.resolve_path("root", "Docs/missing.md"), None);
    }
}
