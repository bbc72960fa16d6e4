//! One immutable-once-published snapshot of a sequence's incremental state.

use super::custom_state::{
    CustomState, CustomStateKind, HeapGraphSequenceState, V8SequenceState, CUSTOM_STATE_SLOTS,
};
use super::track_event_state::TrackEventSequenceState;
use crate::stats::{SharedStats, Stat};
use crate::trackers::V8Tracker;
use crate::wire::{self, TraceBlob};
use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;

/// Incremental decoding state for one sequence, shared by every in-flight
/// unit tokenized while it was current.
///
/// A generation is never mutated after being superseded. Two operations are
/// deliberately in-place on the current generation and do not fork: marking
/// packet loss, and binding a new interning id (the interned map is
/// append-only, so earlier holders only ever gain visibility of ids bound
/// after they captured the handle, never lose or change one).
pub struct PacketSequenceStateGeneration {
    interned_data: RefCell<HashMap<(u32, u64), TraceBlob>>,
    track_event_state: RefCell<TrackEventSequenceState>,
    custom_state: RefCell<[Option<CustomState>; CUSTOM_STATE_SLOTS]>,
    trace_packet_defaults: Option<TraceBlob>,
    incremental_state_valid: Cell<bool>,
    stats: SharedStats,
}

impl PacketSequenceStateGeneration {
    /// The zeroth generation for a new sequence. Incremental state starts
    /// invalid: delta-encoded values are not trustworthy until an
    /// incremental-state-cleared marker arrives.
    pub(crate) fn create_first(stats: SharedStats) -> Rc<Self> {
        Rc::new(Self {
            interned_data: RefCell::new(HashMap::new()),
            track_event_state: RefCell::new(TrackEventSequenceState::new()),
            custom_state: RefCell::new(Default::default()),
            trace_packet_defaults: None,
            incremental_state_valid: Cell::new(false),
            stats,
        })
    }

    /// Fork for an incremental-state clear: only persistent thread identity
    /// carries forward; interned data, defaults and custom state start
    /// empty. Validity becomes true.
    pub(crate) fn fork_for_clear(&self) -> Rc<Self> {
        Rc::new(Self {
            interned_data: RefCell::new(HashMap::new()),
            track_event_state: RefCell::new(self.track_event_state.borrow().cleared()),
            custom_state: RefCell::new(Default::default()),
            trace_packet_defaults: None,
            incremental_state_valid: Cell::new(true),
            stats: Rc::clone(&self.stats),
        })
    }

    /// Fork for a defaults update: interned data and custom-state instances
    /// carry forward unchanged (the latter identity-equal), only the cached
    /// defaults view is replaced. Defaults changes are comparatively
    /// frequent and must not discard expensive-to-rebuild caches.
    pub(crate) fn fork_with_defaults(&self, defaults: TraceBlob) -> Rc<Self> {
        Rc::new(Self {
            interned_data: RefCell::new(self.interned_data.borrow().clone()),
            track_event_state: RefCell::new(self.track_event_state.borrow().clone()),
            custom_state: RefCell::new(self.custom_state.borrow().clone()),
            trace_packet_defaults: Some(defaults),
            incremental_state_valid: Cell::new(self.incremental_state_valid.get()),
            stats: Rc::clone(&self.stats),
        })
    }

    pub fn is_incremental_state_valid(&self) -> bool {
        self.incremental_state_valid.get()
    }

    /// In-place: packets whose correctness depends on validity are dropped
    /// upstream by the needs-incremental-state check, so loss does not fork.
    pub(crate) fn mark_packet_loss(&self) {
        self.incremental_state_valid.set(false);
    }

    /// Bind an interned entry. The interning id is the first sub-field of
    /// the entry message; a malformed or missing id records a statistic and
    /// binds nothing. Re-binding an existing id is expected to carry
    /// identical content; that is a protocol guarantee checked only in
    /// debug builds, not revalidated on the hot path.
    pub fn intern_message(&self, field_id: u32, entry: TraceBlob) {
        let iid = match wire::FieldIter::new(&entry).next() {
            Some(Ok(field)) => match field.value.as_varint() {
                Some(iid) => iid,
                None => {
                    debug!("interned entry for field {field_id} has non-varint leading field");
                    self.stats
                        .borrow_mut()
                        .increment(Stat::InternedDataTokenizerErrors);
                    return;
                }
            },
            _ => {
                debug!("interned entry for field {field_id} has no decodable interning id");
                self.stats
                    .borrow_mut()
                    .increment(Stat::InternedDataTokenizerErrors);
                return;
            }
        };
        match self.interned_data.borrow_mut().entry((field_id, iid)) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(existing) => {
                debug_assert_eq!(
                    existing.get().bytes(),
                    entry.bytes(),
                    "interning id {iid} of field {field_id} re-bound with different content"
                );
            }
        }
    }

    /// Resolve an interning id. A miss records a statistic and returns
    /// `None`; it never aborts ingestion.
    pub fn interned_message(&self, field_id: u32, iid: u64) -> Option<TraceBlob> {
        let found = self.interned_data.borrow().get(&(field_id, iid)).cloned();
        if found.is_none() {
            self.stats
                .borrow_mut()
                .increment(Stat::InternedDataTokenizerErrors);
        }
        found
    }

    /// Number of interned entries currently bound.
    pub fn interned_entry_count(&self) -> usize {
        self.interned_data.borrow().len()
    }

    pub fn trace_packet_defaults(&self) -> Option<&TraceBlob> {
        self.trace_packet_defaults.as_ref()
    }

    // Track-event state accessors. The state has interior mutability
    // because descriptor packets and delta resolution update it on the
    // current generation without forking.

    pub fn pid(&self) -> Option<i64> {
        self.track_event_state.borrow().pid()
    }

    pub fn tid(&self) -> Option<i64> {
        self.track_event_state.borrow().tid()
    }

    pub fn set_thread_identity(&self, pid: i64, tid: i64) {
        self.track_event_state
            .borrow_mut()
            .set_thread_identity(pid, tid);
    }

    pub fn set_reference_timestamp(&self, timestamp_ns: i64) {
        self.track_event_state
            .borrow_mut()
            .set_reference_timestamp(timestamp_ns);
    }

    pub fn set_reference_thread_time(&self, thread_time_ns: i64) {
        self.track_event_state
            .borrow_mut()
            .set_reference_thread_time(thread_time_ns);
    }

    pub fn reference_timestamp(&self) -> Option<i64> {
        self.track_event_state.borrow().reference_timestamp()
    }

    /// Resolve a delta timestamp against the sequence reference, advancing
    /// it. `None` if no reference has been seen on this generation.
    pub fn increment_timestamp(&self, delta_ns: i64) -> Option<i64> {
        self.track_event_state
            .borrow_mut()
            .increment_timestamp(delta_ns)
    }

    // Custom state: one slot per kind, lazily constructed, shared across
    // defaults-derived generations.

    /// The V8 extension for this generation, constructing it on first
    /// access with the given tracker.
    pub fn v8_sequence_state(&self, tracker: &Rc<V8Tracker>) -> Rc<V8SequenceState> {
        let mut slots = self.custom_state.borrow_mut();
        let slot = &mut slots[CustomStateKind::V8 as usize];
        if let Some(CustomState::V8(state)) = slot {
            return Rc::clone(state);
        }
        let state = Rc::new(V8SequenceState::new(Rc::clone(tracker)));
        *slot = Some(CustomState::V8(Rc::clone(&state)));
        state
    }

    /// The heap-graph extension for this generation, constructing it on
    /// first access. Takes no tracker argument.
    pub fn heap_graph_sequence_state(&self) -> Rc<HeapGraphSequenceState> {
        let mut slots = self.custom_state.borrow_mut();
        let slot = &mut slots[CustomStateKind::HeapGraph as usize];
        if let Some(CustomState::HeapGraph(state)) = slot {
            return Rc::clone(state);
        }
        let state = Rc::new(HeapGraphSequenceState::new());
        *slot = Some(CustomState::HeapGraph(Rc::clone(&state)));
        state
    }
}

impl std::fmt::Debug for PacketSequenceStateGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSequenceStateGeneration")
            .field("interned_entries", &self.interned_data.borrow().len())
            .field("valid", &self.incremental_state_valid.get())
            .field("has_defaults", &self.trace_packet_defaults.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::shared_stats;
    use crate::wire::MessageWriter;

    fn interned_entry(iid: u64, name: &str) -> TraceBlob {
        let mut entry = MessageWriter::new();
        entry.append_varint(1, iid);
        entry.append_string(2, name);
        entry.into_blob()
    }

    #[test]
    fn test_intern_and_resolve() {
        let stats = shared_stats();
        let gen = PacketSequenceStateGeneration::create_first(Rc::clone(&stats));
        gen.intern_message(1, interned_entry(7, "foo"));

        let resolved = gen.interned_message(1, 7).unwrap();
        assert_eq!(
            wire::find_field(&resolved, 2).unwrap().as_blob().unwrap().bytes(),
            b"foo"
        );
        assert_eq!(stats.borrow().get(Stat::InternedDataTokenizerErrors), 0);
    }

    #[test]
    fn test_missing_iid_records_stat() {
        let stats = shared_stats();
        let gen = PacketSequenceStateGeneration::create_first(Rc::clone(&stats));
        assert!(gen.interned_message(1, 99).is_none());
        assert_eq!(stats.borrow().get(Stat::InternedDataTokenizerErrors), 1);
    }

    #[test]
    fn test_malformed_interned_entry_records_stat() {
        let stats = shared_stats();
        let gen = PacketSequenceStateGeneration::create_first(Rc::clone(&stats));
        // Leading field is length-delimited, not a varint iid.
        let mut entry = MessageWriter::new();
        entry.append_string(1, "not-an-iid");
        gen.intern_message(1, entry.into_blob());
        assert_eq!(stats.borrow().get(Stat::InternedDataTokenizerErrors), 1);
        assert_eq!(gen.interned_entry_count(), 0);
    }

    #[test]
    fn test_defaults_fork_preserves_interning_and_custom_state_identity() {
        let stats = shared_stats();
        let tracker = V8Tracker::new();
        let g0 = PacketSequenceStateGeneration::create_first(stats);
        g0.intern_message(1, interned_entry(7, "foo"));
        let v8_before = g0.v8_sequence_state(&tracker);

        let defaults = MessageWriter::new().into_blob();
        let g1 = g0.fork_with_defaults(defaults);

        let resolved = g1.interned_message(1, 7).unwrap();
        assert_eq!(
            resolved.bytes(),
            g0.interned_message(1, 7).unwrap().bytes()
        );
        let v8_after = g1.v8_sequence_state(&tracker);
        assert!(Rc::ptr_eq(&v8_before, &v8_after));
    }

    #[test]
    fn test_clear_fork_resets_interning_keeps_identity() {
        let stats = shared_stats();
        let g0 = PacketSequenceStateGeneration::create_first(Rc::clone(&stats));
        g0.set_thread_identity(10, 20);
        g0.set_reference_timestamp(1000);
        g0.intern_message(1, interned_entry(7, "foo"));

        let g1 = g0.fork_for_clear();
        assert!(g1.is_incremental_state_valid());
        assert_eq!(g1.pid(), Some(10));
        assert_eq!(g1.tid(), Some(20));
        assert_eq!(g1.reference_timestamp(), None);
        assert!(g1.interned_message(1, 7).is_none());
        // But the old generation still resolves it.
        assert!(g0.interned_message(1, 7).is_some());
    }

    #[test]
    fn test_new_ids_invisible_to_earlier_generation() {
        let stats = shared_stats();
        let g0 = PacketSequenceStateGeneration::create_first(stats);
        let g1 = g0.fork_with_defaults(MessageWriter::new().into_blob());
        g1.intern_message(1, interned_entry(8, "late"));
        assert!(g0.interned_message(1, 8).is_none());
        assert!(g1.interned_message(1, 8).is_some());
    }

    #[test]
    fn test_packet_loss_is_in_place() {
        let stats = shared_stats();
        let g0 = PacketSequenceStateGeneration::create_first(stats);
        let g1 = g0.fork_for_clear();
        assert!(g1.is_incremental_state_valid());
        g1.mark_packet_loss();
        assert!(!g1.is_incremental_state_valid());
    }

    #[test]
    fn test_heap_graph_state_zero_arg_construction() {
        let stats = shared_stats();
        let gen = PacketSequenceStateGeneration::create_first(stats);
        let hg = gen.heap_graph_sequence_state();
        let first = hg.global_object_id(42);
        assert_eq!(hg.global_object_id(42), first);
        assert!(Rc::ptr_eq(&hg, &gen.heap_graph_sequence_state()));
    }
}
