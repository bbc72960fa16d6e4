//! Per-sequence incremental decoding state.
//!
//! A sequence is one logical ordered source of packets. Its decoding state
//! is versioned as a chain of copy-on-write generations: units tokenized
//! while a generation was current keep a shared handle to it, so a later
//! defaults update or incremental-state clear never changes what an
//! in-flight unit observes.

mod builder;
mod custom_state;
mod generation;
mod track_event_state;

pub use builder::PacketSequenceState;
pub use custom_state::{CustomState, CustomStateKind, HeapGraphSequenceState, V8SequenceState};
pub use generation::PacketSequenceStateGeneration;
pub use track_event_state::TrackEventSequenceState;
