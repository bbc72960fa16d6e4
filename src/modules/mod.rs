//! Pluggable handler modules and the two-phase dispatch contract.
//!
//! A module declares interest in a set of payload field ids. During the
//! tokenize phase (pre-sort, arrival order) interested modules are tried in
//! registration order until one returns non-`Ignored`. During the parse
//! phase (post-sort, global time order) every interested module is invoked
//! once. Modules never need to know about each other.

mod registry;

pub mod log_batch;
pub mod sched_event;
pub mod thread_descriptor;
pub mod track_event;

pub use registry::ModuleRegistry;

use crate::pipeline::{PacketDecoder, ParseContext, TokenizeContext};
use crate::token_buffer::TrackedPacket;

/// Outcome of one dispatch call. Exactly one per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleResult {
    /// Defer to the next interested module, or to the default behavior.
    Ignored,
    /// The unit was consumed; stop dispatch.
    Handled,
    /// Processing of this one unit failed; stop dispatch and surface the
    /// message. Does not abort the ingestion run.
    Error(String),
}

impl ModuleResult {
    pub fn error(message: impl Into<String>) -> Self {
        ModuleResult::Error(message.into())
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, ModuleResult::Ignored)
    }
}

/// A handler registered against one or more payload field ids.
///
/// All methods have default bodies; a tokenize-only or parse-only module
/// overrides just its phase. Lifecycle hooks let stateful tokenizers that
/// are not generation-backed reset local caches.
pub trait TraceModule {
    /// The payload field ids this module is dispatched for.
    fn registered_fields(&self) -> &'static [u32];

    /// Pre-sort dispatch, in arrival order. May rewrite the unit (for
    /// example split a batched packet into synthetic per-event packets via
    /// `TokenizeContext::push_synthetic_packet`) before returning `Handled`
    /// so the outer unit is not also forwarded.
    fn tokenize_packet(
        &mut self,
        _ctx: &mut TokenizeContext<'_>,
        _decoder: &PacketDecoder,
        _field_id: u32,
    ) -> ModuleResult {
        ModuleResult::Ignored
    }

    /// Post-sort dispatch, in global timestamp order, using the generation
    /// snapshot captured at tokenize time (`data.data.generation`).
    fn parse_packet(
        &mut self,
        _ctx: &mut ParseContext,
        _timestamp: i64,
        _data: &TrackedPacket,
        _field_id: u32,
    ) -> ModuleResult {
        ModuleResult::Ignored
    }

    /// Broadcast when a sequence clears its incremental state.
    fn on_incremental_state_cleared(&mut self, _sequence_id: u64) {}

    /// Broadcast when the first packet of a sequence is seen.
    fn on_first_packet_on_sequence(&mut self, _sequence_id: u64) {}

    /// Broadcast once, after every unit has been parsed. For modules that
    /// finalize cross-unit aggregation.
    fn notify_end_of_file(&mut self, _ctx: &mut ParseContext) {}
}
