//! The two-phase ingestion drivers and their shared context types.
//!
//! Control flow: raw chunks → tokenize phase (per-module field dispatch in
//! arrival order, against the sequence's current generation) → token buffer
//! and sorter → parse phase (per-module field dispatch in global timestamp
//! order, against the generation snapshot captured at tokenize time) →
//! trackers.

mod parser;
mod tokenizer;

pub use tokenizer::PacketDecoder;

use crate::modules::ModuleRegistry;
use crate::sequence::{PacketSequenceState, PacketSequenceStateGeneration};
use crate::sorter::{SorterConfig, TraceSorter};
use crate::stats::{shared_stats, SharedStats, StatsSnapshot};
use crate::trackers::Trackers;
use crate::wire::TraceBlob;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Pipeline construction parameters.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub sorter: SorterConfig,
}

/// Context handed to modules during the tokenize phase.
pub struct TokenizeContext<'a> {
    pub stats: SharedStats,
    pub sorter: &'a mut TraceSorter,
    pub sequence_id: u64,
    /// The sequence's current generation; units pushed to the sorter must
    /// capture this snapshot.
    pub generation: Rc<PacketSequenceStateGeneration>,
    /// Envelope timestamp, resolved by the driver (absolute or
    /// delta-decoded). `None` if the packet carried neither form.
    pub timestamp: Option<i64>,
    synthetic: &'a mut VecDeque<TraceBlob>,
}

impl TokenizeContext<'_> {
    /// Re-submit a rewritten packet to the ingestion pipeline. It is
    /// tokenized after the current packet, in submission order. Used by
    /// modules that split one wire packet into several independently
    /// timestamped synthetic packets.
    pub fn push_synthetic_packet(&mut self, raw: TraceBlob) {
        self.synthetic.push_back(raw);
    }
}

/// Context handed to modules during the parse phase.
pub struct ParseContext {
    pub stats: SharedStats,
}

/// The ingestion pipeline: owns the registry, the sorter, and one
/// `PacketSequenceState` per sequence seen.
///
/// Single-threaded and push-driven: every operation runs to completion
/// before returning. The hard part is temporal interleaving of data, not
/// execution concurrency.
pub struct IngestPipeline {
    stats: SharedStats,
    registry: ModuleRegistry,
    sorter: TraceSorter,
    sequences: HashMap<u64, PacketSequenceState>,
    trackers: Trackers,
    synthetic: VecDeque<TraceBlob>,
    eof_notified: bool,
}

impl IngestPipeline {
    /// A pipeline with the bundled modules registered.
    pub fn new(config: PipelineConfig) -> Self {
        let mut pipeline = Self::empty(config);
        let trackers = pipeline.trackers.clone();
        pipeline.register_module(Rc::new(RefCell::new(
            crate::modules::thread_descriptor::ThreadDescriptorModule::new(),
        )));
        pipeline.register_module(Rc::new(RefCell::new(
            crate::modules::track_event::TrackEventModule::new(Rc::clone(&trackers.slices)),
        )));
        pipeline.register_module(Rc::new(RefCell::new(
            crate::modules::sched_event::SchedEventModule::new(Rc::clone(&trackers.sched)),
        )));
        pipeline.register_module(Rc::new(RefCell::new(
            crate::modules::log_batch::LogModule::new(Rc::clone(&trackers.logs)),
        )));
        pipeline
    }

    /// A pipeline with no modules registered. Callers wire their own.
    pub fn empty(config: PipelineConfig) -> Self {
        Self {
            stats: shared_stats(),
            registry: ModuleRegistry::new(),
            sorter: TraceSorter::new(config.sorter),
            sequences: HashMap::new(),
            trackers: Trackers::new(),
            synthetic: VecDeque::new(),
            eof_notified: false,
        }
    }

    /// Register an additional module. Must happen before ingestion starts;
    /// dispatch lists are consulted per packet.
    pub fn register_module(&mut self, module: Rc<RefCell<dyn crate::modules::TraceModule>>) {
        self.registry.register(module);
    }

    pub fn stats(&self) -> SharedStats {
        Rc::clone(&self.stats)
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.borrow().snapshot()
    }

    pub fn trackers(&self) -> &Trackers {
        &self.trackers
    }
}
