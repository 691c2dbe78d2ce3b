//! Change events (§4.4).
//!
//! Observers are registered as boxed closures behind a handle; disposing
//! the handle removes the closure. Handles decouple observer lifetime
//! from any particular holder, per the REDESIGN FLAGS note on weak
//! references.

use std::collections::HashMap;

use crate::id::VertexId;
use crate::value::Value;

/// One change notification. `Move` fires on both the undo and the redo
/// half of conflict resolution (§4.1); observers that only care about
/// the final state should coalesce by vertex id.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Move { vertex_id: VertexId, old_parent_id: Option<VertexId>, new_parent_id: Option<VertexId> },
    Property { vertex_id: VertexId, key: String, value: Option<Value> },
    Children { parent_id: VertexId, children: Vec<VertexId> },
}

pub type Callback = Box<dyn FnMut(&Event) + Send>;

/// Handle returned by `observe*`. Dropping it does nothing by itself —
/// call `dispose` (or let the owning `Listeners` be dropped) to remove
/// the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    global: HashMap<u64, Callback>,
    per_vertex: HashMap<VertexId, HashMap<u64, Callback>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&mut self) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        ListenerId(id)
    }

    pub fn observe_all(&mut self, cb: Callback) -> ListenerId {
        let id = self.fresh_id();
        self.global.insert(id.0, cb);
        id
    }

    pub fn observe_vertex(&mut self, vertex_id: &str, cb: Callback) -> ListenerId {
        let id = self.fresh_id();
        self.per_vertex.entry(vertex_id.to_string()).or_default().insert(id.0, cb);
        id
    }

    /// Remove a handle, wherever it was registered. No-op if already
    /// disposed or unknown.
    pub fn dispose(&mut self, id: ListenerId) {
        self.global.remove(&id.0);
        self.per_vertex.retain(|_, m| {
            m.remove(&id.0);
            !m.is_empty()
        });
    }

    /// Deliver `event` to every matching observer. Per-vertex observers
    /// are matched against the event's own vertex/parent id.
    pub fn dispatch(&mut self, event: &Event) {
        for cb in self.global.values_mut() {
            cb(event);
        }
        let key = match event {
            Event::Move { vertex_id, .. } => Some(vertex_id.clone()),
            Event::Property { vertex_id, .. } => Some(vertex_id.clone()),
            Event::Children { parent_id, .. } => Some(parent_id.clone()),
        };
        if let Some(key) = key {
            if let Some(cbs) = self.per_vertex.get_mut(&key) {
                for cb in cbs.values_mut() {
                    cb(event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn disposed_listener_stops_receiving() {
        let mut listeners = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        let id = listeners.observe_all(Box::new(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        listeners.dispatch(&Event::Property { vertex_id: "a".into(), key: "k".into(), value: None });
        listeners.dispose(id);
        listeners.dispatch(&Event::Property { vertex_id: "a".into(), key: "k".into(), value: None });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn per_vertex_listener_only_sees_its_vertex() {
        let mut listeners = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        listeners.observe_vertex("a", Box::new(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        listeners.dispatch(&Event::Property { vertex_id: "b".into(), key: "k".into(), value: None });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        listeners.dispatch(&Event::Property { vertex_id: "a".into(), key: "k".into(), value: None });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
