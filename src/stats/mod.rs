//! Diagnostics surface: a named-counter table incremented on every
//! recoverable failure.
//!
//! Malformed trace data must degrade gracefully, never crash the importer;
//! the accumulated counters are the only externally visible error signal.
//! The table is an explicit value shared by handle, not a singleton, so
//! unit tests can each observe their own counts.

use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Every recoverable-failure counter the core increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    /// An interned-message reference could not be resolved, or an interned
    /// entry carried a malformed interning id.
    InternedDataTokenizerErrors,
    /// A packet could not be framed or decoded at all.
    MalformedPacketErrors,
    /// A payload field had no interested module and was skipped.
    TokenizerSkippedPackets,
    /// Groups of consecutive packets lost on a sequence.
    SequencePacketLoss,
    /// Packets dropped because they need incremental state while the
    /// sequence's incremental state is invalid.
    IncrementalStateInvalidPacketsDropped,
    /// A delta-encoded timestamp arrived before any reference timestamp.
    MissingTimestampReference,
    /// Sortable packets that carried no timestamp at all.
    MissingTimestampPackets,
    /// Packets that carried no sequence id.
    UnresolvedSequenceErrors,
    /// Payload fields at or above the dynamic-field threshold with no
    /// registered module.
    UnknownExtensionFields,
    /// Units aborted by a module returning an error.
    ModuleErrors,
}

impl Stat {
    pub const ALL: [Stat; 10] = [
        Stat::InternedDataTokenizerErrors,
        Stat::MalformedPacketErrors,
        Stat::TokenizerSkippedPackets,
        Stat::SequencePacketLoss,
        Stat::IncrementalStateInvalidPacketsDropped,
        Stat::MissingTimestampReference,
        Stat::MissingTimestampPackets,
        Stat::UnresolvedSequenceErrors,
        Stat::UnknownExtensionFields,
        Stat::ModuleErrors,
    ];

    /// Stable snake_case name, used as the key in snapshots.
    pub fn name(self) -> &'static str {
        match self {
            Stat::InternedDataTokenizerErrors => "interned_data_tokenizer_errors",
            Stat::MalformedPacketErrors => "malformed_packet_errors",
            Stat::TokenizerSkippedPackets => "tokenizer_skipped_packets",
            Stat::SequencePacketLoss => "sequence_packet_loss",
            Stat::IncrementalStateInvalidPacketsDropped => {
                "incremental_state_invalid_packets_dropped"
            }
            Stat::MissingTimestampReference => "missing_timestamp_reference",
            Stat::MissingTimestampPackets => "missing_timestamp_packets",
            Stat::UnresolvedSequenceErrors => "unresolved_sequence_errors",
            Stat::UnknownExtensionFields => "unknown_extension_fields",
            Stat::ModuleErrors => "module_errors",
        }
    }

    fn index(self) -> usize {
        // `ALL` lists the variants in declaration order.
        self as usize
    }
}

/// The counter table. Queryable after ingestion completes.
#[derive(Debug, Default)]
pub struct StatsTable {
    counts: [u64; Stat::ALL.len()],
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, stat: Stat) {
        self.counts[stat.index()] += 1;
    }

    pub fn get(&self, stat: Stat) -> u64 {
        self.counts[stat.index()]
    }

    /// A serializable snapshot of every counter, including zeros.
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = Stat::ALL
            .iter()
            .map(|s| (s.name(), self.get(*s)))
            .collect();
        StatsSnapshot { counters }
    }
}

/// Snapshot of the counter table, serializable for post-ingestion queries.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub counters: BTreeMap<&'static str, u64>,
}

/// Handle shared by every component that records diagnostics.
pub type SharedStats = Rc<RefCell<StatsTable>>;

/// Convenience constructor for a fresh shared table.
pub fn shared_stats() -> SharedStats {
    Rc::new(RefCell::new(StatsTable::new()))
}
