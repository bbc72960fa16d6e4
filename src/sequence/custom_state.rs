//! Tracker-specific extension caches attached to a generation.
//!
//! Extensions form a closed set of kinds, one fixed slot per kind per
//! generation, lazily constructed by a typed accessor. Each kind declares
//! its constructor arity in its accessor signature, so passing the wrong
//! argument is a compile-time error. Instances are shared by `Rc` across
//! generations derived from defaults updates; only an incremental-state
//! clear produces a generation with empty slots.

use crate::trackers::V8Tracker;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Number of slots in a generation's custom-state array.
pub const CUSTOM_STATE_SLOTS: usize = 2;

/// The closed set of extension kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomStateKind {
    V8 = 0,
    HeapGraph = 1,
}

/// One constructed extension instance.
#[derive(Debug, Clone)]
pub enum CustomState {
    V8(Rc<V8SequenceState>),
    HeapGraph(Rc<HeapGraphSequenceState>),
}

/// Per-sequence cache for the V8 code-tracking parser: maps isolate ids
/// seen on this sequence to tracker rows. Constructed with the shared
/// `V8Tracker` so rows are allocated from one global space.
#[derive(Debug)]
pub struct V8SequenceState {
    tracker: Rc<V8Tracker>,
    isolate_rows: RefCell<HashMap<u64, u32>>,
}

impl V8SequenceState {
    pub(crate) fn new(tracker: Rc<V8Tracker>) -> Self {
        Self {
            tracker,
            isolate_rows: RefCell::new(HashMap::new()),
        }
    }

    /// Row for an isolate id, resolving through the tracker on first sight.
    pub fn isolate_row(&self, isolate_id: u64) -> u32 {
        let mut rows = self.isolate_rows.borrow_mut();
        *rows
            .entry(isolate_id)
            .or_insert_with(|| self.tracker.row_for_isolate(isolate_id))
    }

    pub fn cached_isolates(&self) -> usize {
        self.isolate_rows.borrow().len()
    }
}

/// Per-sequence cache for the heap-graph parser: remaps sequence-local
/// object ids to global ids. Takes no constructor argument.
#[derive(Debug, Default)]
pub struct HeapGraphSequenceState {
    object_id_remap: RefCell<HashMap<u64, u64>>,
    next_global_id: std::cell::Cell<u64>,
}

impl HeapGraphSequenceState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Global id for a sequence-local object id, allocating on first sight.
    pub fn global_object_id(&self, local_id: u64) -> u64 {
        let mut remap = self.object_id_remap.borrow_mut();
        *remap.entry(local_id).or_insert_with(|| {
            let id = self.next_global_id.get();
            self.next_global_id.set(id + 1);
            id
        })
    }

    pub fn cached_objects(&self) -> usize {
        self.object_id_remap.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v8_states_share_rows_through_tracker() {
        let tracker = V8Tracker::new();
        let a = V8SequenceState::new(Rc::clone(&tracker));
        let b = V8SequenceState::new(Rc::clone(&tracker));

        // Same isolate seen on two sequences maps to one tracker row.
        assert_eq!(a.isolate_row(7), b.isolate_row(7));
        assert_ne!(a.isolate_row(7), a.isolate_row(8));
        assert_eq!(tracker.isolate_count(), 2);
        assert_eq!(a.cached_isolates(), 2);
        assert_eq!(b.cached_isolates(), 1);
    }

    #[test]
    fn test_heap_graph_ids_allocate_densely() {
        let state = HeapGraphSequenceState::new();
        let first = state.global_object_id(100);
        let second = state.global_object_id(200);
        assert_ne!(first, second);
        assert_eq!(state.global_object_id(100), first);
        assert_eq!(state.cached_objects(), 2);
    }
}
