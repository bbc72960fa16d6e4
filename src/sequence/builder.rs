//! Drives generation transitions for one sequence.

use super::generation::PacketSequenceStateGeneration;
use crate::stats::{SharedStats, Stat};
use crate::wire::TraceBlob;
use log::debug;
use std::rc::Rc;

/// The mutable head of one sequence's generation chain.
///
/// Holds the current generation handle and forks it in response to
/// lifecycle events. Units tokenized earlier keep their own handles to
/// older generations; the chain is strictly linear per sequence.
#[derive(Debug)]
pub struct PacketSequenceState {
    sequence_id: u64,
    generation: Rc<PacketSequenceStateGeneration>,
    stats: SharedStats,
}

impl PacketSequenceState {
    pub fn new(sequence_id: u64, stats: SharedStats) -> Self {
        let generation = PacketSequenceStateGeneration::create_first(Rc::clone(&stats));
        Self {
            sequence_id,
            generation,
            stats,
        }
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// The generation snapshot units tokenized now should capture.
    pub fn current_generation(&self) -> Rc<PacketSequenceStateGeneration> {
        Rc::clone(&self.generation)
    }

    /// Data loss on the sequence: incremental state can no longer be
    /// trusted until an explicit clear arrives. In place, no fork.
    pub fn on_packet_loss(&mut self) {
        debug!("sequence {}: packet loss", self.sequence_id);
        self.generation.mark_packet_loss();
        self.stats.borrow_mut().increment(Stat::SequencePacketLoss);
    }

    /// Explicit incremental-state clear: fork a fresh generation carrying
    /// only persistent thread identity.
    pub fn on_incremental_state_cleared(&mut self) {
        debug!("sequence {}: incremental state cleared", self.sequence_id);
        self.generation = self.generation.fork_for_clear();
    }

    /// New packet defaults: fork, carrying interned data and custom state
    /// forward unchanged.
    pub fn on_new_trace_packet_defaults(&mut self, defaults: TraceBlob) {
        debug!("sequence {}: new trace packet defaults", self.sequence_id);
        self.generation = self.generation.fork_with_defaults(defaults);
    }

    /// Bind an interned entry into the current generation.
    pub fn intern_message(&self, field_id: u32, entry: TraceBlob) {
        self.generation.intern_message(field_id, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::shared_stats;
    use crate::wire::MessageWriter;

    #[test]
    fn test_first_generation_starts_invalid() {
        let state = PacketSequenceState::new(1, shared_stats());
        assert!(!state.current_generation().is_incremental_state_valid());
    }

    #[test]
    fn test_clear_forks_generation() {
        let mut state = PacketSequenceState::new(1, shared_stats());
        let g0 = state.current_generation();
        state.on_incremental_state_cleared();
        let g1 = state.current_generation();
        assert!(!Rc::ptr_eq(&g0, &g1));
        assert!(g1.is_incremental_state_valid());
        assert!(!g0.is_incremental_state_valid());
    }

    #[test]
    fn test_packet_loss_does_not_fork() {
        let stats = shared_stats();
        let mut state = PacketSequenceState::new(1, Rc::clone(&stats));
        state.on_incremental_state_cleared();
        let g = state.current_generation();
        state.on_packet_loss();
        assert!(Rc::ptr_eq(&g, &state.current_generation()));
        assert!(!g.is_incremental_state_valid());
        assert_eq!(stats.borrow().get(Stat::SequencePacketLoss), 1);
    }

    #[test]
    fn test_defaults_update_forks_and_keeps_validity() {
        let mut state = PacketSequenceState::new(1, shared_stats());
        state.on_incremental_state_cleared();
        let g0 = state.current_generation();
        let mut defaults = MessageWriter::new();
        defaults.append_varint(1, 123);
        state.on_new_trace_packet_defaults(defaults.into_blob());
        let g1 = state.current_generation();
        assert!(!Rc::ptr_eq(&g0, &g1));
        assert!(g1.is_incremental_state_valid());
        assert!(g1.trace_packet_defaults().is_some());
        assert!(g0.trace_packet_defaults().is_none());
    }
}
