//! Field numbers of the packet envelope and the bundled payload messages.
//!
//! The envelope is the outer message of every packet. Fields below
//! `THREAD_DESCRIPTOR` are consumed by the tokenizer driver itself; payload
//! fields are the dispatch keys for module registration.

use bitflags::bitflags;

/// Top-level trace message: repeated packet.
pub const PACKET: u32 = 1;

// Envelope fields handled by the tokenizer driver.
pub const SEQUENCE_ID: u32 = 2;
pub const TIMESTAMP: u32 = 3;
pub const TIMESTAMP_DELTA: u32 = 4;
pub const SEQUENCE_FLAGS: u32 = 5;
pub const INTERNED_DATA: u32 = 6;
pub const TRACE_PACKET_DEFAULTS: u32 = 7;

// Payload fields dispatched to modules.
pub const THREAD_DESCRIPTOR: u32 = 8;
pub const TRACK_EVENT: u32 = 9;
pub const SCHED_EVENT: u32 = 10;
pub const LOG_BATCH: u32 = 11;
pub const LOG_EVENT: u32 = 12;

bitflags! {
    /// Values of the `SEQUENCE_FLAGS` envelope field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SequenceFlags: u64 {
        /// The producer cleared its incremental state before this packet.
        const INCREMENTAL_STATE_CLEARED = 1 << 0;
        /// This packet cannot be decoded without valid incremental state.
        const NEEDS_INCREMENTAL_STATE = 1 << 1;
        /// At least one packet preceding this one was dropped.
        const PREVIOUS_PACKET_DROPPED = 1 << 2;
    }
}

/// Sub-fields of `INTERNED_DATA`. Each entry is a message whose first field
/// is the interning id.
pub mod interned {
    pub const EVENT_NAMES: u32 = 1;

    /// Fields of one interned entry.
    pub const ENTRY_IID: u32 = 1;
    pub const ENTRY_STR: u32 = 2;
}

/// Sub-fields of `THREAD_DESCRIPTOR`.
pub mod thread_descriptor {
    pub const PID: u32 = 1;
    pub const TID: u32 = 2;
    pub const REFERENCE_TIMESTAMP_NS: u32 = 3;
    pub const REFERENCE_THREAD_TIME_NS: u32 = 4;
}

/// Sub-fields of `TRACK_EVENT`.
pub mod track_event {
    pub const NAME_IID: u32 = 1;
    pub const THREAD_TIME_NS: u32 = 2;
    pub const THREAD_INSTRUCTION_COUNT: u32 = 3;
    pub const EXTRA_COUNTER_VALUES: u32 = 4;
}

/// Sub-fields of `SCHED_EVENT`.
pub mod sched_event {
    pub const CPU: u32 = 1;
    pub const PREV_PID: u32 = 2;
    pub const NEXT_PID: u32 = 3;
    pub const NEXT_COMM: u32 = 4;
}

/// Sub-fields of `LOG_BATCH` and `LOG_EVENT`.
pub mod log_event {
    /// Repeated entry inside a `LOG_BATCH`.
    pub const BATCH_ENTRY: u32 = 1;

    /// Fields of one entry / one `LOG_EVENT`.
    pub const TIMESTAMP: u32 = 1;
    pub const SEVERITY: u32 = 2;
    pub const MESSAGE: u32 = 3;
}
